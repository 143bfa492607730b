//! Owned MIDI message representation.
//!
//! The timeline outlives the parsed file bytes, so events are converted from
//! midly's borrowed representation into this owned tagged union at load time.

use midly::{MetaMessage, TrackEventKind};

/// A single MIDI message, channel voice or meta.
///
/// Channels are 0-based (0-15). Note-on messages with velocity 0 are
/// normalised to [`MidiMessage::NoteOff`] when converted from a file.
#[derive(Debug, Clone, PartialEq)]
pub enum MidiMessage {
    /// Note on: channel, key, velocity (always > 0)
    NoteOn { channel: u8, key: u8, velocity: u8 },
    /// Note off: channel, key, release velocity
    NoteOff { channel: u8, key: u8, velocity: u8 },
    /// Program change: channel, program number
    ProgramChange { channel: u8, program: u8 },
    /// Control change: channel, controller, value
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// Set tempo meta event: microseconds per quarter note
    Tempo { microseconds_per_quarter: u32 },
    /// Track name meta event
    TrackName(String),
    /// End of track meta event
    EndOfTrack,
    /// Complete system exclusive message, framed by F0 ... F7
    SysEx(Vec<u8>),
    /// Any other meta event, kept for completeness
    Meta { kind: u8, data: Vec<u8> },
    /// Any other channel message (pitch bend, aftertouch) in wire encoding
    Other(Vec<u8>),
}

impl MidiMessage {
    /// Builds a note-on message. A velocity of zero produces a note-off.
    pub fn note_on(channel: u8, key: u8, velocity: u8) -> Self {
        if velocity == 0 {
            Self::note_off(channel, key, 0)
        } else {
            MidiMessage::NoteOn {
                channel: channel & 0x0F,
                key: key & 0x7F,
                velocity: velocity & 0x7F,
            }
        }
    }

    /// Builds a note-off message.
    pub fn note_off(channel: u8, key: u8, velocity: u8) -> Self {
        MidiMessage::NoteOff {
            channel: channel & 0x0F,
            key: key & 0x7F,
            velocity: velocity & 0x7F,
        }
    }

    /// Converts a midly track event into an owned message.
    pub fn from_track_event(kind: &TrackEventKind<'_>) -> Self {
        match *kind {
            TrackEventKind::Midi { channel, message } => {
                let ch = channel.as_int();
                match message {
                    midly::MidiMessage::NoteOn { key, vel } => {
                        Self::note_on(ch, key.as_int(), vel.as_int())
                    }
                    midly::MidiMessage::NoteOff { key, vel } => {
                        Self::note_off(ch, key.as_int(), vel.as_int())
                    }
                    midly::MidiMessage::ProgramChange { program } => MidiMessage::ProgramChange {
                        channel: ch,
                        program: program.as_int(),
                    },
                    midly::MidiMessage::Controller { controller, value } => {
                        MidiMessage::ControlChange {
                            channel: ch,
                            controller: controller.as_int(),
                            value: value.as_int(),
                        }
                    }
                    midly::MidiMessage::Aftertouch { key, vel } => {
                        MidiMessage::Other(vec![0xA0 | ch, key.as_int(), vel.as_int()])
                    }
                    midly::MidiMessage::ChannelAftertouch { vel } => {
                        MidiMessage::Other(vec![0xD0 | ch, vel.as_int()])
                    }
                    midly::MidiMessage::PitchBend { bend } => {
                        let raw = bend.0.as_int();
                        MidiMessage::Other(vec![0xE0 | ch, (raw & 0x7F) as u8, (raw >> 7) as u8])
                    }
                }
            }
            TrackEventKind::SysEx(data) => {
                let mut bytes = Vec::with_capacity(data.len() + 2);
                bytes.push(0xF0);
                bytes.extend_from_slice(data);
                if bytes.last() != Some(&0xF7) {
                    bytes.push(0xF7);
                }
                MidiMessage::SysEx(bytes)
            }
            TrackEventKind::Escape(data) => MidiMessage::Other(data.to_vec()),
            TrackEventKind::Meta(meta) => match meta {
                MetaMessage::Tempo(tempo) => MidiMessage::Tempo {
                    microseconds_per_quarter: tempo.as_int(),
                },
                MetaMessage::TrackName(name) => {
                    MidiMessage::TrackName(String::from_utf8_lossy(name).into_owned())
                }
                MetaMessage::EndOfTrack => MidiMessage::EndOfTrack,
                MetaMessage::Text(data) => MidiMessage::Meta {
                    kind: 0x01,
                    data: data.to_vec(),
                },
                MetaMessage::TimeSignature(num, denom, clocks, per_quarter) => MidiMessage::Meta {
                    kind: 0x58,
                    data: vec![num, denom, clocks, per_quarter],
                },
                MetaMessage::KeySignature(sharps, minor) => MidiMessage::Meta {
                    kind: 0x59,
                    data: vec![sharps as u8, minor as u8],
                },
                _ => MidiMessage::Meta {
                    kind: 0x7F,
                    data: Vec::new(),
                },
            },
        }
    }

    /// Returns true for a note-on (velocity is always non-zero).
    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiMessage::NoteOn { .. })
    }

    /// Returns true for a note-off.
    pub fn is_note_off(&self) -> bool {
        matches!(self, MidiMessage::NoteOff { .. })
    }

    /// Returns true for meta events, which carry no wire encoding.
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            MidiMessage::Tempo { .. }
                | MidiMessage::TrackName(_)
                | MidiMessage::EndOfTrack
                | MidiMessage::Meta { .. }
        )
    }

    /// Returns the 0-based channel of a channel voice message.
    pub fn channel(&self) -> Option<u8> {
        match self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ControlChange { channel, .. } => Some(*channel),
            MidiMessage::Other(bytes) => match bytes.first() {
                Some(status) if (0x80..0xF0).contains(status) => Some(status & 0x0F),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns the key of a note-on or note-off.
    pub fn note_number(&self) -> Option<u8> {
        match self {
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => Some(*key),
            _ => None,
        }
    }

    /// Returns the velocity of a note-on or note-off.
    pub fn velocity(&self) -> Option<u8> {
        match self {
            MidiMessage::NoteOn { velocity, .. } | MidiMessage::NoteOff { velocity, .. } => {
                Some(*velocity)
            }
            _ => None,
        }
    }

    /// Returns the wire encoding of a live message, or None for meta events.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => Some(vec![0x90 | channel, *key, *velocity]),
            MidiMessage::NoteOff {
                channel,
                key,
                velocity,
            } => Some(vec![0x80 | channel, *key, *velocity]),
            MidiMessage::ProgramChange { channel, program } => {
                Some(vec![0xC0 | channel, *program])
            }
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => Some(vec![0xB0 | channel, *controller, *value]),
            MidiMessage::SysEx(bytes) | MidiMessage::Other(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u4, u7};

    #[test]
    fn test_zero_velocity_note_on_is_note_off() {
        let kind = TrackEventKind::Midi {
            channel: u4::new(3),
            message: midly::MidiMessage::NoteOn {
                key: u7::new(60),
                vel: u7::new(0),
            },
        };
        let message = MidiMessage::from_track_event(&kind);
        assert!(message.is_note_off());
        assert_eq!(message.channel(), Some(3));
        assert_eq!(message.note_number(), Some(60));
    }

    #[test]
    fn test_sysex_is_framed() {
        let payload = [0x43, 0x00, 0x09, 0xF7];
        let message = MidiMessage::from_track_event(&TrackEventKind::SysEx(&payload));
        assert_eq!(
            message.to_bytes(),
            Some(vec![0xF0, 0x43, 0x00, 0x09, 0xF7])
        );
    }

    #[test]
    fn test_wire_encoding() {
        assert_eq!(
            MidiMessage::note_on(1, 64, 100).to_bytes(),
            Some(vec![0x91, 64, 100])
        );
        assert_eq!(
            MidiMessage::ProgramChange {
                channel: 0,
                program: 5
            }
            .to_bytes(),
            Some(vec![0xC0, 5])
        );
        assert_eq!(MidiMessage::EndOfTrack.to_bytes(), None);
        assert!(MidiMessage::TrackName("Lead".into()).is_meta());
    }

    #[test]
    fn test_pitch_bend_channel() {
        let message = MidiMessage::Other(vec![0xE5, 0x00, 0x40]);
        assert_eq!(message.channel(), Some(5));
        assert_eq!(message.note_number(), None);
    }
}

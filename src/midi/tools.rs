//! File-level MIDI utilities: pre-render validation, channel extraction and
//! transposition.
//!
//! Extraction and transposition work on tick positions rather than the
//! timeline, so the output keeps the input's time division and tempo map
//! exactly.

use super::analysis::{ValidationError, ValidationReport};
use super::midi_export::{write_midi_file, TickEvent};
use super::timeline::{read_file, MidiParseError, MidiTimeline};
use super::MidiMessage;
use midly::{Smf, Timing};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Largest transposition accepted in either direction, in semitones.
pub const MAX_TRANSPOSE_SEMITONES: i32 = 48;

/// 0-based General MIDI percussion channel; never transposed.
pub const DRUM_CHANNEL: u8 = 9;

/// Errors from the MIDI file utilities.
#[derive(Debug, Error)]
pub enum MidiToolError {
    #[error(transparent)]
    Parse(#[from] MidiParseError),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("could not write MIDI file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transpose amount out of range (-48 to +48): {0}")]
    TransposeOutOfRange(i32),
    #[error("MIDI channel out of range: {0}")]
    InvalidChannel(u8),
    #[error("no channels selected")]
    NoChannels,
}

/// An SMF held as per-track absolute tick events.
struct TickFile {
    /// Raw header division, written back unchanged.
    division: u16,
    tracks: Vec<Vec<TickEvent>>,
}

impl TickFile {
    fn read(path: &Path) -> Result<Self, MidiParseError> {
        let data = read_file(path)?;
        let smf = Smf::parse(&data).map_err(|e| MidiParseError::Malformed(e.to_string()))?;

        let division = match smf.header.timing {
            Timing::Metrical(tpq) => tpq.as_int(),
            Timing::Timecode(fps, ticks_per_frame) => {
                let frames = (fps.as_int() as i8).wrapping_neg() as u8;
                (u16::from(frames) << 8) | u16::from(ticks_per_frame)
            }
        };

        // Every event shares one priority, so the writer's stable sort keeps file order
        let tracks = smf
            .tracks
            .iter()
            .map(|track| {
                let mut tick = 0u32;
                track
                    .iter()
                    .map(|event| {
                        tick = tick.saturating_add(event.delta.as_int());
                        TickEvent::new(tick, MidiMessage::from_track_event(&event.kind), 0)
                    })
                    .collect()
            })
            .collect();

        Ok(Self { division, tracks })
    }

    fn write(self, path: &Path) -> Result<(), MidiToolError> {
        write_midi_file(path, self.division, self.tracks).map_err(|source| MidiToolError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Loads a file and checks that it is suitable for rendering.
///
/// The check runs on the events as written, before hanging notes are
/// repaired, so the reported length is the file's own.
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed, or fails
/// [`MidiTimeline::check_renderable`].
pub fn validate_file<P: AsRef<Path>>(path: P) -> Result<ValidationReport, MidiToolError> {
    let data = read_file(path.as_ref())?;
    let timeline = MidiTimeline::parse_unrepaired(&data)?;
    Ok(timeline.check_renderable()?)
}

/// Copies the selected channels into a new file.
///
/// Meta, SysEx and other channel-less events are always kept. Tracks left
/// with nothing but an end-of-track marker are dropped.
///
/// # Arguments
///
/// * `input` - Source MIDI file
/// * `output` - Destination (parent directories are created)
/// * `channels` - 0-based channels to keep
///
/// # Returns
///
/// The number of tracks written
pub fn extract_channels<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    channels: &[u8],
) -> Result<usize, MidiToolError> {
    if channels.is_empty() {
        return Err(MidiToolError::NoChannels);
    }
    if let Some(&bad) = channels.iter().find(|&&ch| ch > 15) {
        return Err(MidiToolError::InvalidChannel(bad));
    }
    let keep: BTreeSet<u8> = channels.iter().copied().collect();

    let mut file = TickFile::read(input.as_ref())?;
    let tracks_in = file.tracks.len();
    file.tracks = file
        .tracks
        .into_iter()
        .map(|track| {
            track
                .into_iter()
                .filter(|event| event.message.channel().map_or(true, |ch| keep.contains(&ch)))
                .collect::<Vec<_>>()
        })
        .filter(|track| track.iter().any(|e| e.message != MidiMessage::EndOfTrack))
        .collect();
    let tracks_out = file.tracks.len();

    file.write(output.as_ref())?;
    info!(
        output = %output.as_ref().display(),
        tracks_in,
        tracks_out,
        channels = %format!("{:?}", keep.iter().map(|ch| ch + 1).collect::<Vec<_>>()),
        "channels extracted"
    );
    Ok(tracks_out)
}

/// Shifts every note by `semitones`, clamping keys to 0..=127.
///
/// Notes on the percussion channel are left alone, since their keys select
/// drum sounds rather than pitches.
///
/// # Returns
///
/// The number of note events rewritten
///
/// # Errors
///
/// Returns error if `semitones` is outside +/-48, or the input cannot be
/// read or the output written.
pub fn transpose_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    semitones: i32,
) -> Result<usize, MidiToolError> {
    if !(-MAX_TRANSPOSE_SEMITONES..=MAX_TRANSPOSE_SEMITONES).contains(&semitones) {
        return Err(MidiToolError::TransposeOutOfRange(semitones));
    }

    let mut file = TickFile::read(input.as_ref())?;
    let mut moved = 0;
    for event in file.tracks.iter_mut().flatten() {
        if let Some(message) = transpose_message(&event.message, semitones) {
            event.message = message;
            moved += 1;
        }
    }
    debug!(notes = moved, "notes transposed");

    file.write(output.as_ref())?;
    info!(output = %output.as_ref().display(), semitones, notes = moved, "MIDI transposed");
    Ok(moved)
}

fn transpose_message(message: &MidiMessage, semitones: i32) -> Option<MidiMessage> {
    let shift = |key: u8| (i32::from(key) + semitones).clamp(0, 127) as u8;
    match *message {
        MidiMessage::NoteOn {
            channel,
            key,
            velocity,
        } if channel != DRUM_CHANNEL => Some(MidiMessage::note_on(channel, shift(key), velocity)),
        MidiMessage::NoteOff {
            channel,
            key,
            velocity,
        } if channel != DRUM_CHANNEL => Some(MidiMessage::note_off(channel, shift(key), velocity)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("vstrender_tools_{}", std::process::id()))
            .join(name)
    }

    fn note(tick: u32, channel: u8, key: u8, length: u32) -> [TickEvent; 2] {
        [
            TickEvent::new(tick, MidiMessage::note_on(channel, key, 100), 10),
            TickEvent::new(tick + length, MidiMessage::note_off(channel, key, 0), 9),
        ]
    }

    /// Tempo track plus one track per channel: 0 (melody), 1 (bass), 9 (drums).
    fn write_band(name: &str) -> PathBuf {
        let path = temp_path(name);
        let tempo = vec![
            TickEvent::new(0, MidiMessage::TrackName("Band".to_string()), 0),
            TickEvent::new(
                0,
                MidiMessage::Tempo {
                    microseconds_per_quarter: 600_000,
                },
                1,
            ),
        ];
        let mut melody: Vec<TickEvent> = note(0, 0, 72, 240).into();
        melody.extend(note(480, 0, 126, 240));
        let mut bass: Vec<TickEvent> = vec![TickEvent::new(
            0,
            MidiMessage::ProgramChange {
                channel: 1,
                program: 33,
            },
            0,
        )];
        bass.extend(note(0, 1, 36, 960));
        let drums: Vec<TickEvent> = note(240, DRUM_CHANNEL, 38, 60).into();
        write_midi_file(&path, 96, vec![tempo, melody, bass, drums]).unwrap();
        path
    }

    fn load(path: &Path) -> MidiTimeline {
        MidiTimeline::parse(&fs::read(path).unwrap()).unwrap()
    }

    fn note_keys(timeline: &MidiTimeline) -> Vec<(u8, u8)> {
        timeline
            .events()
            .iter()
            .filter(|e| e.message.is_note_on())
            .map(|e| (e.message.channel().unwrap(), e.message.note_number().unwrap()))
            .collect()
    }

    #[test]
    fn test_extract_keeps_selected_channels_and_meta() {
        let input = write_band("band_extract.mid");
        let output = temp_path("bass_only.mid");

        let tracks = extract_channels(&input, &output, &[1]).unwrap();
        // Tempo track and bass track survive
        assert_eq!(tracks, 2);

        let original = load(&input);
        let extracted = load(&output);
        assert_eq!(note_keys(&extracted), vec![(1, 36)]);
        assert_eq!(extracted.track_names(), &["Band".to_string()]);
        assert!(extracted
            .events()
            .iter()
            .any(|e| matches!(e.message, MidiMessage::ProgramChange { channel: 1, program: 33 })));

        // Same division and tempo, so the bass note-off lands at the same time
        let bass_off = |timeline: &MidiTimeline| {
            timeline
                .events()
                .iter()
                .find(|e| e.message == MidiMessage::note_off(1, 36, 0))
                .unwrap()
                .timestamp
        };
        assert!((bass_off(&extracted) - bass_off(&original)).abs() < 1e-9);
        assert!((bass_off(&extracted) - 6.0).abs() < 1e-9);

        fs::remove_file(&input).ok();
        fs::remove_file(&output).ok();
    }

    #[test]
    fn test_extract_rejects_bad_channel_lists() {
        let input = write_band("band_bad_channels.mid");
        let output = temp_path("never.mid");
        assert!(matches!(
            extract_channels(&input, &output, &[]),
            Err(MidiToolError::NoChannels)
        ));
        assert!(matches!(
            extract_channels(&input, &output, &[0, 16]),
            Err(MidiToolError::InvalidChannel(16))
        ));
        assert!(!output.exists());
        fs::remove_file(&input).ok();
    }

    #[test]
    fn test_transpose_shifts_pitched_notes_only() {
        let input = write_band("band_transpose.mid");
        let output = temp_path("band_up.mid");

        let moved = transpose_file(&input, &output, 12).unwrap();
        // Two melody notes and one bass note, on and off each
        assert_eq!(moved, 6);

        let keys = note_keys(&load(&output));
        assert!(keys.contains(&(0, 84)));
        // 126 + 12 clamps to the top key
        assert!(keys.contains(&(0, 127)));
        assert!(keys.contains(&(1, 48)));
        assert!(keys.contains(&(DRUM_CHANNEL, 38)));

        let down = temp_path("band_down.mid");
        transpose_file(&input, &down, -48).unwrap();
        assert!(note_keys(&load(&down)).contains(&(1, 0)));

        for path in [&input, &output, &down] {
            fs::remove_file(path).ok();
        }
    }

    #[test]
    fn test_transpose_range() {
        let input = temp_path("unused.mid");
        let output = temp_path("unused_out.mid");
        assert!(matches!(
            transpose_file(&input, &output, 49),
            Err(MidiToolError::TransposeOutOfRange(49))
        ));
        assert!(matches!(
            transpose_file(&input, &output, -49),
            Err(MidiToolError::TransposeOutOfRange(-49))
        ));
        assert!(matches!(
            transpose_file(&input, &output, 0),
            Err(MidiToolError::Parse(MidiParseError::NotFound(_)))
        ));
    }

    #[test]
    fn test_smpte_division_survives_rewrite() {
        let input = temp_path("smpte_in.mid");
        let output = temp_path("smpte_out.mid");
        // -25 fps, 40 ticks per frame
        let division = (0xE7u16 << 8) | 40;
        write_midi_file(&input, division, vec![note(250, 0, 60, 1500).into()]).unwrap();

        transpose_file(&input, &output, 2).unwrap();
        let bytes = fs::read(&output).unwrap();
        assert_eq!(u16::from_be_bytes([bytes[12], bytes[13]]), division);

        let timeline = load(&output);
        let on = &timeline.events()[0];
        assert_eq!(on.message, MidiMessage::note_on(0, 62, 100));
        assert!((on.timestamp - 0.25).abs() < 1e-9);

        fs::remove_file(&input).ok();
        fs::remove_file(&output).ok();
    }

    #[test]
    fn test_validate_file() {
        let input = write_band("band_validate.mid");
        let report = validate_file(&input).unwrap();
        assert_eq!(report.note_ons, 4);
        assert!((report.duration - 6.0).abs() < 1e-9);
        assert!(!report.dense);
        fs::remove_file(&input).ok();

        let empty = temp_path("tempo_only.mid");
        write_midi_file(
            &empty,
            480,
            vec![vec![TickEvent::new(
                0,
                MidiMessage::Tempo {
                    microseconds_per_quarter: 500_000,
                },
                0,
            )]],
        )
        .unwrap();
        assert!(matches!(
            validate_file(&empty),
            Err(MidiToolError::Invalid(ValidationError::NoNotes))
        ));
        fs::remove_file(&empty).ok();

        assert!(matches!(
            validate_file(temp_path("missing.mid")),
            Err(MidiToolError::Parse(MidiParseError::NotFound(_)))
        ));
    }
}

//! Absolute-time MIDI timeline.
//!
//! Loads a Standard MIDI File into a single list of events ordered by their
//! time in seconds, across all tracks.
//!
//! # Timing
//!
//! - PPQ files convert ticks with the tempo value in effect when the event is
//!   reached during a track-by-track scan. A tempo change only affects events
//!   scanned after it; earlier ticks are not re-integrated. This keeps
//!   multi-tempo files rendering exactly as they always have.
//! - SMPTE files are already in absolute units: ticks are divided by
//!   `frames_per_second * ticks_per_frame` and tempo events are ignored.
//!   Raw SMPTE tick counts are never used as seconds directly.

use super::{note_to_name, MidiMessage, DEFAULT_MICROSECONDS_PER_QUARTER};
use midly::{Smf, Timing};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Delay after the last event at which hanging notes are released.
pub const HANGING_NOTE_GRACE_SECONDS: f64 = 0.1;

/// Release velocity used for synthesized note-offs.
const REPAIR_VELOCITY: u8 = 64;

/// Errors that can occur while loading a timeline.
#[derive(Debug, Error)]
pub enum MidiParseError {
    /// The file does not exist
    #[error("MIDI file not found: {0}")]
    NotFound(PathBuf),
    /// The file exists but could not be read
    #[error("could not open MIDI file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Header or track data is invalid
    #[error("could not parse MIDI file: {0}")]
    Malformed(String),
    /// The file parsed but contains no note-on events
    #[error("MIDI file contains no note-on events")]
    NoNotes,
}

/// A MIDI message positioned in absolute time.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    /// Time from the start of the file, in seconds.
    pub timestamp: f64,
    /// The message.
    pub message: MidiMessage,
}

impl TimedEvent {
    pub fn new(timestamp: f64, message: MidiMessage) -> Self {
        Self { timestamp, message }
    }
}

/// Time conversion mode read from the file header.
#[derive(Debug, Clone, Copy)]
enum TimeBase {
    /// Ticks per quarter note.
    Ppq(u16),
    /// Ticks per second (frames per second * ticks per frame).
    Smpte(f64),
}

/// A parsed MIDI file as an absolute-time event list.
///
/// Events are always ordered by non-decreasing timestamp. After loading,
/// every note-on has a later note-off on the same channel and key.
#[derive(Debug, Clone, Default)]
pub struct MidiTimeline {
    events: Vec<TimedEvent>,
    total_length: f64,
    track_names: Vec<String>,
}

impl MidiTimeline {
    /// Loads and repairs a timeline from a MIDI file.
    ///
    /// # Errors
    ///
    /// - [`MidiParseError::NotFound`] if the path does not exist
    /// - [`MidiParseError::Unreadable`] if the file cannot be read
    /// - [`MidiParseError::Malformed`] if the header or a track is invalid
    /// - [`MidiParseError::NoNotes`] if no note-on events are present
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MidiParseError> {
        let data = read_file(path.as_ref())?;
        let timeline = Self::parse(&data)?;
        timeline.summary().log();
        Ok(timeline)
    }

    /// Parses and repairs a timeline from in-memory SMF bytes.
    pub fn parse(data: &[u8]) -> Result<Self, MidiParseError> {
        let mut timeline = Self::parse_unrepaired(data)?;
        timeline.validate()?;
        timeline.repair_hanging_notes();
        Ok(timeline)
    }

    /// Parses and sorts SMF bytes without the note checks or repair.
    pub(crate) fn parse_unrepaired(data: &[u8]) -> Result<Self, MidiParseError> {
        let smf = Smf::parse(data).map_err(|e| MidiParseError::Malformed(e.to_string()))?;

        let time_base = match smf.header.timing {
            Timing::Metrical(tpq) => TimeBase::Ppq(tpq.as_int().max(1)),
            Timing::Timecode(fps, ticks_per_frame) => {
                TimeBase::Smpte(fps.as_f32() as f64 * ticks_per_frame.max(1) as f64)
            }
        };
        debug!(tracks = smf.tracks.len(), ?time_base, "parsed MIDI header");

        let mut timeline = Self::default();
        let mut microseconds_per_quarter = DEFAULT_MICROSECONDS_PER_QUARTER;

        for (track_idx, track) in smf.tracks.iter().enumerate() {
            let mut current_tick: u64 = 0;

            for event in track {
                current_tick += event.delta.as_int() as u64;

                let timestamp = match time_base {
                    TimeBase::Ppq(tpq) => {
                        super::ticks_to_seconds(current_tick, tpq, microseconds_per_quarter)
                    }
                    TimeBase::Smpte(ticks_per_second) => current_tick as f64 / ticks_per_second,
                };

                let message = MidiMessage::from_track_event(&event.kind);
                match &message {
                    MidiMessage::Tempo {
                        microseconds_per_quarter: tempo,
                    } if *tempo > 0 => {
                        microseconds_per_quarter = *tempo;
                        debug!(
                            track = track_idx,
                            bpm = super::tempo_to_bpm(*tempo),
                            at = timestamp,
                            "tempo change"
                        );
                    }
                    MidiMessage::TrackName(name) => timeline.track_names.push(name.clone()),
                    _ => {}
                }

                timeline.push_event(TimedEvent::new(timestamp, message));
            }
        }

        timeline.sort();
        Ok(timeline)
    }

    /// Builds a timeline from already-timed events without repairing them.
    ///
    /// Events are sorted; `total_length` is the latest timestamp.
    pub fn from_events(events: Vec<TimedEvent>) -> Self {
        let mut timeline = Self::default();
        for event in events {
            timeline.push_event(event);
        }
        timeline.sort();
        timeline
    }

    fn push_event(&mut self, event: TimedEvent) {
        self.total_length = self.total_length.max(event.timestamp);
        self.events.push(event);
    }

    /// Stable sort by timestamp: simultaneous events keep file order.
    fn sort(&mut self) {
        self.events
            .sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    }

    /// Fails on files without notes; warns on unbalanced note counts.
    fn validate(&self) -> Result<(), MidiParseError> {
        let note_ons = self.events.iter().filter(|e| e.message.is_note_on()).count();
        let note_offs = self.events.iter().filter(|e| e.message.is_note_off()).count();

        if note_ons == 0 {
            return Err(MidiParseError::NoNotes);
        }
        if note_ons != note_offs {
            warn!(note_ons, note_offs, "mismatched note-on/note-off counts");
        }
        Ok(())
    }

    /// Releases every note-on left without a note-off at the end of the file.
    ///
    /// Unmatched note-ons are counted per (channel, key). For each one a
    /// note-off with velocity 64 is added on the same channel at
    /// `total_length + HANGING_NOTE_GRACE_SECONDS`, then the list is re-sorted.
    ///
    /// # Returns
    ///
    /// The number of note-offs synthesized
    pub fn repair_hanging_notes(&mut self) -> usize {
        let mut hanging: BTreeMap<(u8, u8), usize> = BTreeMap::new();

        for event in &self.events {
            match event.message {
                MidiMessage::NoteOn { channel, key, .. } => {
                    *hanging.entry((channel, key)).or_insert(0) += 1;
                }
                MidiMessage::NoteOff { channel, key, .. } => {
                    if let Some(count) = hanging.get_mut(&(channel, key)) {
                        *count = count.saturating_sub(1);
                    }
                }
                _ => {}
            }
        }

        let release_time = self.total_length + HANGING_NOTE_GRACE_SECONDS;
        let mut repaired = 0;

        for ((channel, key), count) in hanging {
            for _ in 0..count {
                self.push_event(TimedEvent::new(
                    release_time,
                    MidiMessage::note_off(channel, key, REPAIR_VELOCITY),
                ));
                repaired += 1;
            }
            if count > 0 {
                warn!(
                    channel,
                    note = %note_to_name(key),
                    count,
                    at = release_time,
                    "releasing hanging note"
                );
            }
        }

        if repaired > 0 {
            self.sort();
        }
        repaired
    }

    /// Returns the events in time order.
    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// Returns the latest event timestamp in seconds.
    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    /// Returns the track names found in the file, in file order.
    pub fn track_names(&self) -> &[String] {
        &self.track_names
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the timeline has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Reads raw SMF bytes, distinguishing a missing file from an unreadable one.
pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, MidiParseError> {
    if !path.exists() {
        return Err(MidiParseError::NotFound(path.to_path_buf()));
    }
    let data = fs::read(path).map_err(|source| MidiParseError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), bytes = data.len(), "loading MIDI file");
    Ok(data)
}

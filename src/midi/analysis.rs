//! Timeline statistics for logging, the `--analyze` command and the
//! `--validate` pre-render check.

use super::{note_to_name, tempo_to_bpm, MidiMessage, MidiTimeline};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

/// Longest file accepted for rendering, in seconds.
pub const MAX_RENDER_SECONDS: f64 = 3600.0;

/// Event density above which a file is flagged as heavy to render.
pub const DENSE_EVENTS_PER_SECOND: f64 = 1000.0;

/// Reasons a timeline is unsuitable for rendering.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("MIDI file contains no events")]
    NoEvents,
    #[error("MIDI file contains no note events")]
    NoNotes,
    #[error("MIDI file has invalid duration: {0:.3}s")]
    InvalidDuration(f64),
    #[error("MIDI file too long ({0:.1}s > 1 hour), consider splitting")]
    TooLong(f64),
}

/// Outcome of a successful render check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub events: usize,
    pub note_ons: usize,
    pub duration: f64,
    pub events_per_second: f64,
    /// Above [`DENSE_EVENTS_PER_SECOND`]; renders but may be slow.
    pub dense: bool,
}

/// Per-channel note statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSummary {
    pub note_count: usize,
    /// Last program change seen on the channel.
    pub program: Option<u8>,
}

/// Aggregate statistics over a loaded timeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineSummary {
    pub total_events: usize,
    pub note_ons: usize,
    pub note_offs: usize,
    pub other_events: usize,
    pub first_note: Option<f64>,
    pub last_note: Option<f64>,
    pub lowest_note: Option<u8>,
    pub highest_note: Option<u8>,
    /// Tempo changes in BPM, in time order.
    pub tempo_changes: Vec<f64>,
    pub track_names: Vec<String>,
    /// Keyed by 0-based channel.
    pub channels: BTreeMap<u8, ChannelSummary>,
    pub total_length: f64,
}

impl TimelineSummary {
    /// Average of all tempo changes, or 120 BPM if the file has none.
    pub fn average_bpm(&self) -> f64 {
        if self.tempo_changes.is_empty() {
            120.0
        } else {
            self.tempo_changes.iter().sum::<f64>() / self.tempo_changes.len() as f64
        }
    }

    pub(crate) fn log(&self) {
        info!(
            events = self.total_events,
            note_ons = self.note_ons,
            note_offs = self.note_offs,
            tracks = self.track_names.len(),
            channels = self.channels.len(),
            length = %format!("{:.3}s", self.total_length),
            "MIDI timeline loaded"
        );
        if let (Some(first), Some(last)) = (self.first_note, self.last_note) {
            info!(
                first = %format!("{:.3}s", first),
                last = %format!("{:.3}s", last),
                span = %format!("{:.3}s", last - first),
                "note span"
            );
        }
    }
}

impl fmt::Display for TimelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Duration: {:.3} seconds", self.total_length)?;
        if let (Some(first), Some(last)) = (self.first_note, self.last_note) {
            writeln!(f, "First note: {:.3}s, last note: {:.3}s", first, last)?;
        }
        if let (Some(low), Some(high)) = (self.lowest_note, self.highest_note) {
            writeln!(f, "Note range: {} - {}", note_to_name(low), note_to_name(high))?;
        }
        writeln!(
            f,
            "Events: {} ({} note on, {} note off, {} other)",
            self.total_events, self.note_ons, self.note_offs, self.other_events
        )?;
        writeln!(f, "Average tempo: {:.1} BPM", self.average_bpm())?;
        for name in &self.track_names {
            writeln!(f, "Track: {}", name)?;
        }
        for (channel, info) in &self.channels {
            write!(f, "Channel {}: {} notes", channel + 1, info.note_count)?;
            if let Some(program) = info.program {
                write!(f, ", program {}", program)?;
            }
            if *channel == 9 {
                write!(f, " (drums)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl MidiTimeline {
    /// Computes statistics over the current event list.
    pub fn summary(&self) -> TimelineSummary {
        let mut summary = TimelineSummary {
            total_events: self.len(),
            track_names: self.track_names().to_vec(),
            total_length: self.total_length(),
            ..Default::default()
        };

        for event in self.events() {
            match event.message {
                MidiMessage::NoteOn { channel, key, .. } => {
                    summary.note_ons += 1;
                    summary.first_note.get_or_insert(event.timestamp);
                    summary.last_note = Some(event.timestamp);
                    summary.lowest_note = Some(summary.lowest_note.map_or(key, |n| n.min(key)));
                    summary.highest_note = Some(summary.highest_note.map_or(key, |n| n.max(key)));
                    summary.channels.entry(channel).or_default().note_count += 1;
                }
                MidiMessage::NoteOff { .. } => summary.note_offs += 1,
                MidiMessage::ProgramChange { channel, program } => {
                    summary.other_events += 1;
                    summary.channels.entry(channel).or_default().program = Some(program);
                }
                MidiMessage::Tempo {
                    microseconds_per_quarter,
                } => {
                    summary.other_events += 1;
                    summary.tempo_changes.push(tempo_to_bpm(microseconds_per_quarter));
                }
                _ => summary.other_events += 1,
            }
        }

        summary
    }
}

impl MidiTimeline {
    /// Checks that the timeline is worth rendering.
    ///
    /// Dense files pass with [`ValidationReport::dense`] set and a warning
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns error if the timeline has no events, no note-ons, a
    /// non-positive length, or is longer than [`MAX_RENDER_SECONDS`].
    pub fn check_renderable(&self) -> Result<ValidationReport, ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::NoEvents);
        }
        let note_ons = self.events().iter().filter(|e| e.message.is_note_on()).count();
        if note_ons == 0 {
            return Err(ValidationError::NoNotes);
        }
        let duration = self.total_length();
        if duration <= 0.0 {
            return Err(ValidationError::InvalidDuration(duration));
        }
        if duration > MAX_RENDER_SECONDS {
            return Err(ValidationError::TooLong(duration));
        }

        let events_per_second = self.len() as f64 / duration;
        let dense = events_per_second > DENSE_EVENTS_PER_SECOND;
        if dense {
            warn!(
                events_per_second = %format!("{:.1}", events_per_second),
                "very dense MIDI file, may impact performance"
            );
        }
        Ok(ValidationReport {
            events: self.len(),
            note_ons,
            duration,
            events_per_second,
            dense,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::TimedEvent;

    #[test]
    fn test_summary_counts() {
        let timeline = MidiTimeline::from_events(vec![
            TimedEvent::new(0.0, MidiMessage::Tempo { microseconds_per_quarter: 600_000 }),
            TimedEvent::new(0.0, MidiMessage::ProgramChange { channel: 9, program: 0 }),
            TimedEvent::new(0.25, MidiMessage::note_on(9, 36, 120)),
            TimedEvent::new(0.5, MidiMessage::note_off(9, 36, 0)),
            TimedEvent::new(1.0, MidiMessage::note_on(0, 72, 80)),
            TimedEvent::new(1.5, MidiMessage::note_off(0, 72, 0)),
        ]);

        let summary = timeline.summary();
        assert_eq!(summary.total_events, 6);
        assert_eq!(summary.note_ons, 2);
        assert_eq!(summary.note_offs, 2);
        assert_eq!(summary.other_events, 2);
        assert_eq!(summary.first_note, Some(0.25));
        assert_eq!(summary.last_note, Some(1.0));
        assert_eq!(summary.lowest_note, Some(36));
        assert_eq!(summary.highest_note, Some(72));
        assert_eq!(summary.channels[&9].program, Some(0));
        assert_eq!(summary.channels[&0].note_count, 1);
        assert!((summary.average_bpm() - 100.0).abs() < 1e-9);

        let text = summary.to_string();
        assert!(text.contains("Note range: C2 - C5"));
        assert!(text.contains("Channel 10: 1 notes, program 0 (drums)"));
    }

    #[test]
    fn test_empty_summary_defaults() {
        let summary = MidiTimeline::default().summary();
        assert_eq!(summary.note_ons, 0);
        assert_eq!(summary.first_note, None);
        assert_eq!(summary.average_bpm(), 120.0);
    }

    #[test]
    fn test_check_renderable() {
        let timeline = MidiTimeline::from_events(vec![
            TimedEvent::new(0.0, MidiMessage::note_on(0, 60, 100)),
            TimedEvent::new(2.0, MidiMessage::note_off(0, 60, 0)),
        ]);
        let report = timeline.check_renderable().unwrap();
        assert_eq!(report.events, 2);
        assert_eq!(report.note_ons, 1);
        assert_eq!(report.duration, 2.0);
        assert!((report.events_per_second - 1.0).abs() < 1e-9);
        assert!(!report.dense);
    }

    #[test]
    fn test_check_renderable_failures() {
        assert_eq!(
            MidiTimeline::default().check_renderable(),
            Err(ValidationError::NoEvents)
        );
        let tempo_only = MidiTimeline::from_events(vec![TimedEvent::new(
            1.0,
            MidiMessage::Tempo { microseconds_per_quarter: 500_000 },
        )]);
        assert_eq!(tempo_only.check_renderable(), Err(ValidationError::NoNotes));

        let instant = MidiTimeline::from_events(vec![TimedEvent::new(
            0.0,
            MidiMessage::note_on(0, 60, 100),
        )]);
        assert_eq!(
            instant.check_renderable(),
            Err(ValidationError::InvalidDuration(0.0))
        );

        let long = MidiTimeline::from_events(vec![
            TimedEvent::new(0.0, MidiMessage::note_on(0, 60, 100)),
            TimedEvent::new(3600.5, MidiMessage::note_off(0, 60, 0)),
        ]);
        assert_eq!(long.check_renderable(), Err(ValidationError::TooLong(3600.5)));
    }

    #[test]
    fn test_dense_file_passes_with_flag() {
        let events: Vec<TimedEvent> = (0..2001)
            .map(|i| {
                let t = i as f64 / 2000.0;
                if i % 2 == 0 {
                    TimedEvent::new(t, MidiMessage::note_on(0, 60, 100))
                } else {
                    TimedEvent::new(t, MidiMessage::note_off(0, 60, 0))
                }
            })
            .collect();
        let report = MidiTimeline::from_events(events).check_renderable().unwrap();
        assert!(report.dense);
        assert!(report.events_per_second > DENSE_EVENTS_PER_SECOND);
    }
}

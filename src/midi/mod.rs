//! MIDI data structures for offline rendering.
//!
//! This module turns Standard MIDI Files into an absolute-time event list
//! that the block scheduler can window into per-block buffers. It also
//! provides a small SMF writer used for generating test material, and file
//! utilities for checking, splitting and transposing input files.

mod analysis;
mod message;
mod midi_export;
mod timeline;
mod tools;

pub use analysis::{
    ChannelSummary, TimelineSummary, ValidationError, ValidationReport, DENSE_EVENTS_PER_SECOND,
    MAX_RENDER_SECONDS,
};
pub use message::MidiMessage;
pub use midi_export::{
    create_drum_pattern, create_scale, create_test_midi, write_midi_file, ScaleKind, TickEvent,
    UnknownScale, DEFAULT_TICKS_PER_QUARTER,
};
pub use timeline::{MidiParseError, MidiTimeline, TimedEvent, HANGING_NOTE_GRACE_SECONDS};
pub use tools::{
    extract_channels, transpose_file, validate_file, MidiToolError, DRUM_CHANNEL,
    MAX_TRANSPOSE_SEMITONES,
};

/// Standard MIDI note names for display purposes.
/// Maps MIDI note number (0-127) to note name within an octave.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Tempo assumed until the first tempo meta event: 120 BPM.
pub const DEFAULT_MICROSECONDS_PER_QUARTER: u32 = 500_000;

/// Converts a MIDI note number to a human-readable note name with octave.
///
/// # Arguments
///
/// * `note` - MIDI note number (0-127)
///
/// # Returns
///
/// String representation like "C4" or "F#5"
///
/// # Examples
///
/// ```
/// use vstrender::midi::note_to_name;
///
/// let name = note_to_name(60); // Middle C
/// assert_eq!(name, "C4");
/// ```
pub fn note_to_name(note: u8) -> String {
    if note > 127 {
        return "Invalid".to_string();
    }
    let octave = (note / 12) as i8 - 1; // MIDI octave convention
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

/// Converts a tick position to seconds using a single tempo value.
///
/// # Arguments
///
/// * `ticks` - Absolute tick position
/// * `ticks_per_quarter` - File resolution (PPQ)
/// * `microseconds_per_quarter` - Tempo in effect for the conversion
pub fn ticks_to_seconds(ticks: u64, ticks_per_quarter: u16, microseconds_per_quarter: u32) -> f64 {
    let seconds_per_quarter = microseconds_per_quarter as f64 / 1_000_000.0;
    ticks as f64 / ticks_per_quarter as f64 * seconds_per_quarter
}

/// Converts a microseconds-per-quarter tempo value to beats per minute.
pub fn tempo_to_bpm(microseconds_per_quarter: u32) -> f64 {
    if microseconds_per_quarter == 0 {
        return 0.0;
    }
    60_000_000.0 / microseconds_per_quarter as f64
}

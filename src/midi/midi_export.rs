//! Standard MIDI File (SMF) writing.
//!
//! Produces Format 1 files from tick-positioned messages. The time division
//! is written verbatim, so both PPQ and SMPTE files can be generated. Used by
//! the test-material commands (`--make-test-midi`, `--make-drums`,
//! `--make-scale`), by the file utilities and as a fixture builder in tests.

use super::tools::DRUM_CHANNEL;
use super::{MidiMessage, NOTE_NAMES};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Resolution used by generated files.
pub const DEFAULT_TICKS_PER_QUARTER: u16 = 480;

/// Writes a variable-length quantity (VLQ) used for delta times in MIDI.
///
/// VLQ encodes values using 7 bits per byte, with the MSB indicating
/// whether more bytes follow (1 = more bytes, 0 = last byte).
fn write_vlq(value: u32, buffer: &mut Vec<u8>) {
    if value == 0 {
        buffer.push(0);
        return;
    }

    let mut temp = value;
    let mut bytes = Vec::with_capacity(4);

    while temp > 0 {
        bytes.push((temp & 0x7F) as u8);
        temp >>= 7;
    }

    // Write bytes in reverse order with continuation bits
    for (i, &byte) in bytes.iter().rev().enumerate() {
        if i < bytes.len() - 1 {
            buffer.push(byte | 0x80);
        } else {
            buffer.push(byte);
        }
    }
}

/// A message positioned at an absolute tick within one track.
#[derive(Debug, Clone)]
pub struct TickEvent {
    /// Absolute tick position
    pub tick: u32,
    /// The message to write
    pub message: MidiMessage,
    /// Priority for sorting events at the same tick (lower = first)
    pub priority: u8,
}

impl TickEvent {
    pub fn new(tick: u32, message: MidiMessage, priority: u8) -> Self {
        Self {
            tick,
            message,
            priority,
        }
    }
}

/// Writes a single message to the buffer (without delta time).
fn write_message(message: &MidiMessage, buffer: &mut Vec<u8>) {
    match message {
        MidiMessage::Tempo {
            microseconds_per_quarter,
        } => {
            // Meta event: FF 51 03 tt tt tt
            buffer.extend_from_slice(&[0xFF, 0x51, 0x03]);
            buffer.push((microseconds_per_quarter >> 16) as u8);
            buffer.push((microseconds_per_quarter >> 8) as u8);
            buffer.push(*microseconds_per_quarter as u8);
        }
        MidiMessage::TrackName(name) => {
            buffer.extend_from_slice(&[0xFF, 0x03]);
            write_vlq(name.len() as u32, buffer);
            buffer.extend_from_slice(name.as_bytes());
        }
        MidiMessage::EndOfTrack => buffer.extend_from_slice(&[0xFF, 0x2F, 0x00]),
        MidiMessage::Meta { kind, data } => {
            buffer.extend_from_slice(&[0xFF, *kind]);
            write_vlq(data.len() as u32, buffer);
            buffer.extend_from_slice(data);
        }
        MidiMessage::SysEx(bytes) => {
            // F0 <length> <data after F0, including F7>
            buffer.push(0xF0);
            let body = bytes.get(1..).unwrap_or(&[]);
            write_vlq(body.len() as u32, buffer);
            buffer.extend_from_slice(body);
        }
        live => {
            if let Some(bytes) = live.to_bytes() {
                buffer.extend_from_slice(&bytes);
            }
        }
    }
}

/// Builds the track chunk data from a list of tick events.
///
/// Events are sorted by tick position and converted to delta times. An
/// end-of-track event is appended if the caller did not supply one.
fn build_track_data(events: &mut Vec<TickEvent>) -> Vec<u8> {
    let mut buffer = Vec::new();
    events.sort_by(|a, b| a.tick.cmp(&b.tick).then(a.priority.cmp(&b.priority)));

    if !matches!(events.last(), Some(e) if e.message == MidiMessage::EndOfTrack) {
        let last_tick = events.last().map(|e| e.tick).unwrap_or(0);
        events.push(TickEvent::new(last_tick, MidiMessage::EndOfTrack, 255));
    }

    let mut last_tick = 0u32;
    for event in events.iter() {
        let delta = event.tick.saturating_sub(last_tick);
        write_vlq(delta, &mut buffer);
        write_message(&event.message, &mut buffer);
        last_tick = event.tick;
    }

    buffer
}

/// Writes a track chunk to the output.
fn write_track_chunk<W: Write>(writer: &mut W, track_data: &[u8]) -> std::io::Result<()> {
    writer.write_all(b"MTrk")?;
    let length = track_data.len() as u32;
    writer.write_all(&length.to_be_bytes())?;
    writer.write_all(track_data)?;
    Ok(())
}

/// Writes a Format 1 Standard MIDI File.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories are created)
/// * `division` - Raw header time division: ticks per quarter note when the
///   top bit is clear, or `(-fps as u8) << 8 | ticks_per_frame` for SMPTE
/// * `tracks` - One event list per track
///
/// # Errors
///
/// Returns error if file creation or writing fails
pub fn write_midi_file<P: AsRef<Path>>(
    path: P,
    division: u16,
    tracks: Vec<Vec<TickEvent>>,
) -> std::io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(b"MThd")?;
    writer.write_all(&6u32.to_be_bytes())?; // Header length (always 6)
    writer.write_all(&1u16.to_be_bytes())?; // Format 1 (multi-track)
    writer.write_all(&(tracks.len() as u16).to_be_bytes())?;
    writer.write_all(&division.to_be_bytes())?;

    for mut events in tracks {
        let track_data = build_track_data(&mut events);
        write_track_chunk(&mut writer, &track_data)?;
    }

    writer.flush()?;
    Ok(())
}

/// Creates a four-chord test file (I-IV-V-I) on channel 0.
///
/// Each chord occupies a quarter of `duration_seconds` and sounds for 80% of
/// its slot, leaving audible gaps between chords.
///
/// # Arguments
///
/// * `path` - Output file path
/// * `duration_seconds` - Total length of the progression
/// * `base_note` - Root of the first chord (60 = C4)
/// * `bpm` - Tempo written to the file
pub fn create_test_midi<P: AsRef<Path>>(
    path: P,
    duration_seconds: f64,
    base_note: u8,
    bpm: f64,
) -> std::io::Result<()> {
    let bpm = if bpm > 0.0 { bpm } else { 120.0 };
    let ticks_per_second = DEFAULT_TICKS_PER_QUARTER as f64 * bpm / 60.0;
    let total_ticks = (duration_seconds * ticks_per_second) as u32;

    let chords: [[u8; 3]; 4] = [[0, 4, 7], [5, 9, 12], [7, 11, 14], [0, 4, 7]];
    let chord_duration = duration_seconds / chords.len() as f64;

    let root_name = NOTE_NAMES[(base_note % 12) as usize];
    let mut events = vec![
        TickEvent::new(
            0,
            MidiMessage::TrackName(format!("Test Track ({})", root_name)),
            0,
        ),
        TickEvent::new(
            0,
            MidiMessage::Tempo {
                microseconds_per_quarter: (60_000_000.0 / bpm) as u32,
            },
            1,
        ),
    ];

    for (index, chord) in chords.iter().enumerate() {
        let start_time = index as f64 * chord_duration;
        let end_time = start_time + chord_duration * 0.8;
        let start_tick = (start_time * ticks_per_second) as u32;
        let end_tick = (end_time * ticks_per_second) as u32;

        for interval in chord {
            let key = base_note.saturating_add(*interval).min(127);
            events.push(TickEvent::new(start_tick, MidiMessage::note_on(0, key, 100), 10));
            events.push(TickEvent::new(end_tick, MidiMessage::note_off(0, key, 100), 9));
        }
    }

    events.push(TickEvent::new(total_ticks, MidiMessage::EndOfTrack, 255));

    write_midi_file(path, DEFAULT_TICKS_PER_QUARTER, vec![events])
}

fn tempo_event(bpm: f64) -> TickEvent {
    TickEvent::new(
        0,
        MidiMessage::Tempo {
            microseconds_per_quarter: (60_000_000.0 / bpm) as u32,
        },
        1,
    )
}

/// Adds a note-on and its note-off `length` ticks later.
fn push_note(events: &mut Vec<TickEvent>, tick: u32, channel: u8, key: u8, velocity: u8, length: u32) {
    events.push(TickEvent::new(tick, MidiMessage::note_on(channel, key, velocity), 10));
    events.push(TickEvent::new(
        tick + length,
        MidiMessage::note_off(channel, key, velocity),
        9,
    ));
}

/// Appends end-of-track at `total_ticks` or after the last note, whichever is later.
fn finish_track(events: &mut Vec<TickEvent>, total_ticks: u32) {
    let last = events.iter().map(|e| e.tick).max().unwrap_or(0);
    events.push(TickEvent::new(total_ticks.max(last), MidiMessage::EndOfTrack, 255));
}

// General MIDI percussion keys
const KICK: u8 = 36;
const SNARE: u8 = 38;
const CLOSED_HAT: u8 = 42;
const OPEN_HAT: u8 = 46;
const CRASH: u8 = 49;

/// Creates a 4/4 rock beat on the percussion channel (MIDI channel 10).
///
/// Each bar has kicks on beats 1 and 3, snares on 2 and 4, and eighth-note
/// hi-hats with accented downbeats and an open hat on the last eighth. A
/// crash opens the file.
///
/// # Arguments
///
/// * `path` - Output file path
/// * `duration_seconds` - Bars are started until this time is reached
/// * `bpm` - Tempo written to the file
pub fn create_drum_pattern<P: AsRef<Path>>(
    path: P,
    duration_seconds: f64,
    bpm: f64,
) -> std::io::Result<()> {
    let bpm = if bpm > 0.0 { bpm } else { 120.0 };
    let ticks_per_second = DEFAULT_TICKS_PER_QUARTER as f64 * bpm / 60.0;
    let total_ticks = (duration_seconds * ticks_per_second) as u32;
    let bar = 4 * DEFAULT_TICKS_PER_QUARTER as u32;

    let mut events = vec![
        TickEvent::new(0, MidiMessage::TrackName("Drum Track".to_string()), 0),
        tempo_event(bpm),
    ];
    push_note(&mut events, 0, DRUM_CHANNEL, CRASH, 120, 960);

    for start in (0..total_ticks).step_by(bar as usize) {
        push_note(&mut events, start, DRUM_CHANNEL, KICK, 100, 120);
        push_note(&mut events, start + bar / 2, DRUM_CHANNEL, KICK, 90, 120);
        push_note(&mut events, start + bar / 4, DRUM_CHANNEL, SNARE, 110, 120);
        push_note(&mut events, start + 3 * bar / 4, DRUM_CHANNEL, SNARE, 105, 120);

        for eighth in 0..8 {
            let tick = start + eighth * bar / 8;
            if eighth == 7 {
                push_note(&mut events, tick, DRUM_CHANNEL, OPEN_HAT, 70, 240);
            } else {
                let velocity = if eighth % 2 == 0 { 80 } else { 60 };
                push_note(&mut events, tick, DRUM_CHANNEL, CLOSED_HAT, velocity, 60);
            }
        }
    }

    finish_track(&mut events, total_ticks);
    write_midi_file(path, DEFAULT_TICKS_PER_QUARTER, vec![events])
}

/// Scale shapes available to [`create_scale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleKind {
    Major,
    /// Natural minor
    Minor,
    Chromatic,
    /// Major pentatonic
    Pentatonic,
    Blues,
}

impl ScaleKind {
    /// Semitone offsets from the root, ending on the octave.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ScaleKind::Major => &[0, 2, 4, 5, 7, 9, 11, 12],
            ScaleKind::Minor => &[0, 2, 3, 5, 7, 8, 10, 12],
            ScaleKind::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
            ScaleKind::Pentatonic => &[0, 2, 4, 7, 9, 12],
            ScaleKind::Blues => &[0, 3, 5, 6, 7, 10, 12],
        }
    }

    /// Offsets played up and back down, without repeating the top note.
    pub fn pattern(self) -> Vec<u8> {
        let up = self.intervals();
        let mut pattern = up.to_vec();
        pattern.extend(up.iter().rev().skip(1));
        pattern
    }
}

impl fmt::Display for ScaleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScaleKind::Major => "Major",
            ScaleKind::Minor => "Minor",
            ScaleKind::Chromatic => "Chromatic",
            ScaleKind::Pentatonic => "Pentatonic",
            ScaleKind::Blues => "Blues",
        };
        f.write_str(name)
    }
}

/// Returned when a scale name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown scale type: {0} (supported: major, minor, chromatic, pentatonic, blues)")]
pub struct UnknownScale(pub String);

impl FromStr for ScaleKind {
    type Err = UnknownScale;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "major" => Ok(ScaleKind::Major),
            "minor" => Ok(ScaleKind::Minor),
            "chromatic" => Ok(ScaleKind::Chromatic),
            "pentatonic" => Ok(ScaleKind::Pentatonic),
            "blues" => Ok(ScaleKind::Blues),
            _ => Err(UnknownScale(s.to_string())),
        }
    }
}

/// Gap left between consecutive scale notes, in ticks.
const SCALE_NOTE_GAP: u32 = 48;

/// Creates a scale played up and back down on channel 0.
///
/// The whole pattern is spread evenly over `duration_seconds`; each note
/// is released a short gap before the next one starts. Keys above 127 are
/// clamped.
///
/// # Arguments
///
/// * `path` - Output file path
/// * `kind` - Scale shape
/// * `root` - Lowest note (60 = C4)
/// * `duration_seconds` - Length of the full up-and-down pattern
/// * `bpm` - Tempo written to the file
pub fn create_scale<P: AsRef<Path>>(
    path: P,
    kind: ScaleKind,
    root: u8,
    duration_seconds: f64,
    bpm: f64,
) -> std::io::Result<()> {
    let bpm = if bpm > 0.0 { bpm } else { 120.0 };
    let ticks_per_second = DEFAULT_TICKS_PER_QUARTER as f64 * bpm / 60.0;
    let total_ticks = (duration_seconds * ticks_per_second) as u32;

    let pattern = kind.pattern();
    let ticks_per_note = (duration_seconds * ticks_per_second / pattern.len() as f64) as u32;
    let length = ticks_per_note.saturating_sub(SCALE_NOTE_GAP).max(1);

    let mut events = vec![
        TickEvent::new(0, MidiMessage::TrackName(format!("{} Scale", kind)), 0),
        tempo_event(bpm),
    ];
    for (index, offset) in pattern.iter().enumerate() {
        let key = root.saturating_add(*offset).min(127);
        push_note(&mut events, index as u32 * ticks_per_note, 0, key, 80, length);
    }

    finish_track(&mut events, total_ticks);
    write_midi_file(path, DEFAULT_TICKS_PER_QUARTER, vec![events])
}

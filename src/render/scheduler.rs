//! Block render scheduler.
//!
//! Walks the destination buffer in fixed-size blocks, windows the MIDI
//! timeline into each block with sample-accurate offsets, and runs every
//! slot of the chain over the block in order.
//!
//! Block windows are half-open: an event at exactly a block's start time
//! lands at offset 0 of that block, and an event at exactly its end time
//! belongs to the next block.

use super::{AudioBlock, AudioBuffer, MidiBuffer, ProcessingUnitChain};
use crate::midi::{MidiMessage, MidiTimeline, TimedEvent};
use tracing::{debug, error_span, info};

/// Blocks between progress log lines.
const PROGRESS_INTERVAL_BLOCKS: usize = 200;

/// RMS above which a block counts as audible.
const AUDIBLE_RMS: f32 = 0.001;

/// Counters collected over one render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderStats {
    pub blocks: usize,
    pub events_sent: usize,
    pub note_ons_sent: usize,
    pub note_offs_sent: usize,
    /// Instrument passes that left the first channel audible. Counted once per
    /// instrument slot, so a block with two sounding instruments adds two.
    pub blocks_with_audio: usize,
    /// Final RMS of each output channel.
    pub channel_rms: Vec<f32>,
}

impl RenderStats {
    /// True if any output channel carries signal.
    pub fn has_audio(&self) -> bool {
        self.channel_rms.iter().sum::<f32>() > 0.0001
    }
}

/// Monotonic read position into a timeline's events.
///
/// Each event is handed out at most once, to the first block whose window
/// reaches its timestamp.
#[derive(Debug)]
pub struct EventCursor<'a> {
    events: &'a [TimedEvent],
    position: usize,
}

impl<'a> EventCursor<'a> {
    pub fn new(events: &'a [TimedEvent]) -> Self {
        Self {
            events,
            position: 0,
        }
    }

    /// Index of the next event to be considered.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves every event before `block_end` into `midi` at its sample offset.
    ///
    /// Events earlier than `block_start` are skipped. Offsets are rounded to
    /// the nearest sample and clamped to `0..samples`.
    ///
    /// # Returns
    ///
    /// The number of events added to `midi`
    pub fn fill_block(
        &mut self,
        block_start: f64,
        block_end: f64,
        samples: usize,
        sample_rate: f64,
        midi: &mut MidiBuffer,
    ) -> usize {
        let mut added = 0;
        while let Some(event) = self.events.get(self.position) {
            if event.timestamp >= block_end {
                break;
            }
            if event.timestamp >= block_start {
                let offset = ((event.timestamp - block_start) * sample_rate).round();
                let offset = (offset.max(0.0) as usize).min(samples.saturating_sub(1));
                midi.add_event(event.message.clone(), offset);
                added += 1;
            }
            self.position += 1;
        }
        added
    }
}

/// Renders the chain across the whole destination buffer.
///
/// Every block is zeroed before the chain runs, so instruments start from
/// silence. The first instrument in the chain consumes the block's MIDI;
/// later slots see an empty buffer.
///
/// # Panics
///
/// Panics if `block_size` is zero.
pub fn render(
    chain: &mut ProcessingUnitChain,
    timeline: &MidiTimeline,
    dest: &mut AudioBuffer,
    sample_rate: f64,
    block_size: usize,
) -> RenderStats {
    info!(
        samples = dest.num_samples(),
        block_size,
        channels = dest.num_channels(),
        sample_rate,
        events = timeline.len(),
        slots = chain.len(),
        "rendering instrument chain"
    );
    drive(chain, Some(timeline), dest, sample_rate, block_size, true)
}

/// Runs an effects chain over audio already in `dest`.
///
/// Blocks are not cleared and every slot receives empty MIDI.
///
/// # Panics
///
/// Panics if `block_size` is zero.
pub fn process_in_place(
    chain: &mut ProcessingUnitChain,
    dest: &mut AudioBuffer,
    sample_rate: f64,
    block_size: usize,
) -> RenderStats {
    info!(
        samples = dest.num_samples(),
        block_size,
        channels = dest.num_channels(),
        slots = chain.len(),
        "processing audio through chain"
    );
    drive(chain, None, dest, sample_rate, block_size, false)
}

fn drive(
    chain: &mut ProcessingUnitChain,
    timeline: Option<&MidiTimeline>,
    dest: &mut AudioBuffer,
    sample_rate: f64,
    block_size: usize,
    clear_blocks: bool,
) -> RenderStats {
    assert!(block_size > 0, "block size must be positive");

    let total_samples = dest.num_samples();
    let mut cursor = EventCursor::new(timeline.map(MidiTimeline::events).unwrap_or(&[]));
    let mut midi = MidiBuffer::new();
    let empty_midi = MidiBuffer::new();
    let mut stats = RenderStats::default();

    let mut start_sample = 0;
    while start_sample < total_samples {
        let samples_this_block = block_size.min(total_samples - start_sample);
        let block_start = start_sample as f64 / sample_rate;
        let block_end = (start_sample + samples_this_block) as f64 / sample_rate;

        midi.clear();
        let added = cursor.fill_block(block_start, block_end, samples_this_block, sample_rate, &mut midi);
        if added > 0 {
            record_events(&mut stats, &midi);
            debug!(start_sample, events = added, "block MIDI");
        }

        let mut block = dest.block(start_sample, samples_this_block);
        if clear_blocks {
            block.clear();
        }
        run_chain(chain, &mut block, &mut midi, &empty_midi, &mut stats);

        stats.blocks += 1;
        if stats.blocks % PROGRESS_INTERVAL_BLOCKS == 0 {
            let progress = start_sample as f64 / total_samples as f64 * 100.0;
            info!(progress = %format!("{:.1}%", progress), "render progress");
        }

        start_sample += block_size;
    }

    stats.channel_rms = (0..dest.num_channels())
        .map(|ch| dest.rms(ch, 0, total_samples))
        .collect();

    info!(
        blocks = stats.blocks,
        events = stats.events_sent,
        note_ons = stats.note_ons_sent,
        note_offs = stats.note_offs_sent,
        blocks_with_audio = stats.blocks_with_audio,
        "render finished"
    );
    for (channel, rms) in stats.channel_rms.iter().enumerate() {
        debug!(channel, rms = %format!("{:.4}", rms), "channel level");
    }
    stats
}

/// Runs every slot over one block in chain order.
fn run_chain(
    chain: &mut ProcessingUnitChain,
    block: &mut AudioBlock<'_>,
    midi: &mut MidiBuffer,
    empty_midi: &MidiBuffer,
    stats: &mut RenderStats,
) {
    for (index, slot) in chain.iter_mut().enumerate() {
        let _span = error_span!("unit", slot = index, name = %slot.name()).entered();
        if slot.is_instrument() {
            slot.process(block, midi);
            if block.rms(0) > AUDIBLE_RMS {
                stats.blocks_with_audio += 1;
            }
            // A block's MIDI goes to one instrument only
            midi.clear();
        } else {
            slot.process(block, empty_midi);
        }
    }
}

fn record_events(stats: &mut RenderStats, midi: &MidiBuffer) {
    for event in midi {
        stats.events_sent += 1;
        match event.message {
            MidiMessage::NoteOn { .. } => stats.note_ons_sent += 1,
            MidiMessage::NoteOff { .. } => stats.note_offs_sent += 1,
            _ => {}
        }
    }
}

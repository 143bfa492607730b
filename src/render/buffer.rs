//! Audio and MIDI buffers passed to processing units.
//!
//! [`AudioBuffer`] owns the whole render; [`AudioBlock`] is a mutable view of
//! one block of it, and [`MidiBuffer`] holds the events for that block keyed
//! by sample offset.

use crate::midi::MidiMessage;

/// Planar multi-channel float audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    num_samples: usize,
}

impl AudioBuffer {
    /// Creates a silent buffer.
    pub fn new(num_channels: usize, num_samples: usize) -> Self {
        Self {
            channels: vec![vec![0.0; num_samples]; num_channels],
            num_samples,
        }
    }

    /// Wraps existing channel data. Channels are truncated to the shortest one.
    pub fn from_channels(mut channels: Vec<Vec<f32>>) -> Self {
        let num_samples = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in &mut channels {
            channel.truncate(num_samples);
        }
        Self {
            channels,
            num_samples,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Returns a view of `len` samples starting at `start` on every channel.
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the end of the buffer. The scheduler
    /// sizes every block so this cannot happen.
    pub fn block(&mut self, start: usize, len: usize) -> AudioBlock<'_> {
        assert!(
            start + len <= self.num_samples,
            "block {}..{} exceeds buffer of {} samples",
            start,
            start + len,
            self.num_samples
        );
        AudioBlock {
            channels: self
                .channels
                .iter_mut()
                .map(|channel| &mut channel[start..start + len])
                .collect(),
            start_sample: start,
            len,
        }
    }

    /// Root-mean-square level of one channel over a range.
    pub fn rms(&self, channel: usize, start: usize, len: usize) -> f32 {
        rms(&self.channels[channel][start..start + len])
    }
}

/// A mutable view of one block across all channels of an [`AudioBuffer`].
#[derive(Debug)]
pub struct AudioBlock<'a> {
    channels: Vec<&'a mut [f32]>,
    start_sample: usize,
    len: usize,
}

impl<'a> AudioBlock<'a> {
    /// Wraps standalone channel slices, e.g. scratch buffers.
    ///
    /// All slices must have the same length.
    pub fn from_slices(channels: Vec<&'a mut [f32]>) -> Self {
        let len = channels.first().map(|c| c.len()).unwrap_or(0);
        debug_assert!(channels.iter().all(|c| c.len() == len));
        Self {
            channels,
            start_sample: 0,
            len,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples per channel in this block.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position of the first sample within the whole render.
    pub fn start_sample(&self) -> usize {
        self.start_sample
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    pub fn channels_mut(&mut self) -> &mut [&'a mut [f32]] {
        &mut self.channels
    }

    /// Sets every sample to zero.
    pub fn clear(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.fill(0.0);
        }
    }

    pub fn rms(&self, channel: usize) -> f32 {
        self.channels.get(channel).map(|c| rms(c)).unwrap_or(0.0)
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// A MIDI message at a sample offset within the current block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEvent {
    pub offset: usize,
    pub message: MidiMessage,
}

/// MIDI events for one block, ordered by sample offset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MidiBuffer {
    events: Vec<BlockEvent>,
}

impl MidiBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event, keeping events with equal offsets in insertion order.
    pub fn add_event(&mut self, message: MidiMessage, offset: usize) {
        let index = self.events.partition_point(|e| e.offset <= offset);
        self.events.insert(index, BlockEvent { offset, message });
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BlockEvent> {
        self.events.iter()
    }
}

impl<'a> IntoIterator for &'a MidiBuffer {
    type Item = &'a BlockEvent;
    type IntoIter = std::slice::Iter<'a, BlockEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

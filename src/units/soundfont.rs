//! SoundFont instrument.
//!
//! Wraps a rustysynth synthesizer as an instrument unit. The synthesizer is
//! created when the unit is prepared, since it needs the sample rate. Within
//! a block, audio is rendered in segments between event offsets so each MIDI
//! event takes effect close to its sample position.

use crate::midi::MidiMessage;
use crate::render::{
    AudioBlock, Configure, Configured, MidiBuffer, ParameterInfo, ProcessSetup, ProcessingUnit,
    UnitError,
};
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// General MIDI program count.
pub const PROGRAM_COUNT: usize = 128;

/// MIDI channel reserved for percussion (0-based).
const DRUM_CHANNEL: u8 = 9;

const MASTER_VOLUME_PARAM: usize = 0;
const DEFAULT_MASTER_VOLUME: f32 = 0.5;

/// Restorable state, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SynthState {
    #[serde(default)]
    program: Option<usize>,
    #[serde(default = "default_master_volume")]
    master_volume: f32,
}

fn default_master_volume() -> f32 {
    DEFAULT_MASTER_VOLUME
}

/// A General MIDI synthesizer backed by a `.sf2` file.
pub struct SoundFontInstrument {
    soundfont: Arc<SoundFont>,
    synth: Option<Synthesizer>,
    program: Option<usize>,
    master_volume: f32,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl std::fmt::Debug for SoundFontInstrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundFontInstrument")
            .field("prepared", &self.synth.is_some())
            .field("program", &self.program)
            .field("master_volume", &self.master_volume)
            .finish_non_exhaustive()
    }
}

impl SoundFontInstrument {
    /// Loads a SoundFont file.
    ///
    /// # Errors
    ///
    /// Returns [`UnitError::Load`] if the file cannot be opened or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, UnitError> {
        let path = path.as_ref();
        let load_error = |reason: String| UnitError::Load {
            path: path.display().to_string(),
            reason,
        };

        let mut reader = BufReader::new(File::open(path).map_err(|e| load_error(e.to_string()))?);
        let soundfont = SoundFont::new(&mut reader).map_err(|e| load_error(format!("{:?}", e)))?;
        info!(
            path = %path.display(),
            presets = soundfont.get_presets().len(),
            "SoundFont loaded"
        );

        Ok(Self {
            soundfont: Arc::new(soundfont),
            synth: None,
            program: None,
            master_volume: DEFAULT_MASTER_VOLUME,
            left: Vec::new(),
            right: Vec::new(),
        })
    }

    /// Name of a General MIDI program in this SoundFont's melodic bank.
    pub fn program_name(&self, index: usize) -> String {
        self.soundfont
            .get_presets()
            .iter()
            .find(|p| p.get_bank_number() == 0 && p.get_patch_number() as usize == index)
            .map(|p| p.get_name().trim().to_string())
            .unwrap_or_else(|| format!("Program {}", index))
    }

    fn prepare(&mut self, setup: ProcessSetup) -> Result<(), UnitError> {
        let settings = SynthesizerSettings::new(setup.sample_rate as i32);
        let mut synth =
            Synthesizer::new(&self.soundfont, &settings).map_err(|e| UnitError::Load {
                path: "synthesizer".to_string(),
                reason: format!("{:?}", e),
            })?;
        synth.set_master_volume(self.master_volume);
        if let Some(program) = self.program {
            send_program(&mut synth, program);
        }
        self.left = vec![0.0; setup.max_block_size];
        self.right = vec![0.0; setup.max_block_size];
        self.synth = Some(synth);
        debug!(sample_rate = setup.sample_rate, "synthesizer ready");
        Ok(())
    }

    fn select_program(&mut self, index: usize) -> Result<Configured, UnitError> {
        if index >= PROGRAM_COUNT {
            return Err(UnitError::ProgramOutOfRange {
                requested: index,
                available: PROGRAM_COUNT,
            });
        }
        self.program = Some(index);
        if let Some(synth) = self.synth.as_mut() {
            send_program(synth, index);
        }
        Ok(Configured::Program {
            name: self.program_name(index),
        })
    }

    fn set_master_volume(&mut self, value: f32) {
        self.master_volume = value.max(0.0);
        if let Some(synth) = self.synth.as_mut() {
            synth.set_master_volume(self.master_volume);
        }
    }

    fn master_volume_info(&self) -> ParameterInfo {
        ParameterInfo {
            index: MASTER_VOLUME_PARAM,
            name: "Master Volume".to_string(),
            value: self.master_volume,
        }
    }
}

impl ProcessingUnit for SoundFontInstrument {
    fn configure(&mut self, request: Configure) -> Result<Configured, UnitError> {
        match request {
            Configure::Prepare(setup) => {
                self.prepare(setup)?;
                Ok(Configured::Ready)
            }
            Configure::SelectProgram(index) => self.select_program(index),
            Configure::LoadState(bytes) => {
                let state: SynthState = serde_json::from_slice(&bytes)
                    .map_err(|e| UnitError::InvalidState(e.to_string()))?;
                if let Some(program) = state.program {
                    self.select_program(program)?;
                }
                self.set_master_volume(state.master_volume);
                Ok(Configured::Ready)
            }
            Configure::DescribeParameters => {
                Ok(Configured::Parameters(vec![self.master_volume_info()]))
            }
            Configure::SetParameter { index, value } => {
                if index != MASTER_VOLUME_PARAM {
                    return Err(UnitError::ParameterOutOfRange(index));
                }
                self.set_master_volume(value);
                Ok(Configured::Parameter(self.master_volume_info()))
            }
        }
    }

    fn process(&mut self, audio: &mut AudioBlock<'_>, midi: &MidiBuffer) {
        let Self {
            synth, left, right, ..
        } = self;
        let Some(synth) = synth.as_mut() else {
            return;
        };

        let len = audio.len();
        if left.len() < len {
            left.resize(len, 0.0);
            right.resize(len, 0.0);
        }

        let mut cursor = 0;
        for event in midi {
            let offset = event.offset.min(len);
            if offset > cursor {
                synth.render(&mut left[..offset - cursor], &mut right[..offset - cursor]);
                write_segment(audio, cursor, &left[..offset - cursor], &right[..offset - cursor]);
                cursor = offset;
            }
            apply_message(synth, &event.message);
        }
        if len > cursor {
            synth.render(&mut left[..len - cursor], &mut right[..len - cursor]);
            write_segment(audio, cursor, &left[..len - cursor], &right[..len - cursor]);
        }
    }
}

/// Sends a program change to every melodic channel.
fn send_program(synth: &mut Synthesizer, program: usize) {
    for channel in (0..16u8).filter(|&c| c != DRUM_CHANNEL) {
        synth.process_midi_message(channel as i32, 0xC0, program as i32, 0);
    }
}

fn apply_message(synth: &mut Synthesizer, message: &MidiMessage) {
    if let Some((channel, command, data1, data2)) = channel_command(message) {
        synth.process_midi_message(channel, command, data1, data2);
    }
}

/// Splits a channel voice message into rustysynth's (channel, command, data1, data2).
///
/// Returns `None` for SysEx, meta and other non-channel messages.
fn channel_command(message: &MidiMessage) -> Option<(i32, i32, i32, i32)> {
    let bytes = message.to_bytes()?;
    let status = *bytes.first()?;
    if !(0x80..0xF0).contains(&status) {
        return None;
    }
    let data1 = bytes.get(1).copied().unwrap_or(0);
    let data2 = bytes.get(2).copied().unwrap_or(0);
    Some((
        (status & 0x0F) as i32,
        (status & 0xF0) as i32,
        data1 as i32,
        data2 as i32,
    ))
}

/// Copies a rendered stereo segment into the block at `start`.
///
/// Mono blocks get the average of both sides; wider blocks alternate
/// left and right across channels.
fn write_segment(audio: &mut AudioBlock<'_>, start: usize, left: &[f32], right: &[f32]) {
    let len = left.len();
    match audio.num_channels() {
        0 => {}
        1 => {
            let out = &mut audio.channel_mut(0)[start..start + len];
            for ((o, l), r) in out.iter_mut().zip(left).zip(right) {
                *o = 0.5 * (l + r);
            }
        }
        channels => {
            for ch in 0..channels {
                let source = if ch % 2 == 0 { left } else { right };
                audio.channel_mut(ch)[start..start + len].copy_from_slice(source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::AudioBuffer;

    #[test]
    fn test_channel_command() {
        assert_eq!(
            channel_command(&MidiMessage::note_on(3, 60, 100)),
            Some((3, 0x90, 60, 100))
        );
        assert_eq!(
            channel_command(&MidiMessage::note_off(0, 60, 64)),
            Some((0, 0x80, 60, 64))
        );
        assert_eq!(
            channel_command(&MidiMessage::ProgramChange {
                channel: 15,
                program: 42
            }),
            Some((15, 0xC0, 42, 0))
        );
        assert_eq!(channel_command(&MidiMessage::SysEx(vec![0xF0, 0x43, 0xF7])), None);
        assert_eq!(
            channel_command(&MidiMessage::Tempo {
                microseconds_per_quarter: 500_000
            }),
            None
        );
    }

    #[test]
    fn test_write_segment_layouts() {
        let left = [1.0, 1.0];
        let right = [0.0, -1.0];

        let mut stereo = AudioBuffer::new(3, 4);
        {
            let mut block = stereo.block(0, 4);
            write_segment(&mut block, 1, &left, &right);
        }
        assert_eq!(stereo.channel(0), &[0.0, 1.0, 1.0, 0.0]);
        assert_eq!(stereo.channel(1), &[0.0, 0.0, -1.0, 0.0]);
        assert_eq!(stereo.channel(2), &[0.0, 1.0, 1.0, 0.0]);

        let mut mono = AudioBuffer::new(1, 2);
        {
            let mut block = mono.block(0, 2);
            write_segment(&mut block, 0, &left, &right);
        }
        assert_eq!(mono.channel(0), &[0.5, 0.0]);
    }

    #[test]
    fn test_missing_soundfont_is_load_error() {
        let result = SoundFontInstrument::load("/nonexistent/piano.sf2");
        assert!(matches!(result, Err(UnitError::Load { .. })));
    }

    #[test]
    #[ignore] // Requires SoundFont file
    fn test_renders_note() {
        let path = std::env::var("VSTRENDER_TEST_SOUNDFONT")
            .unwrap_or_else(|_| "TimGM6mb.sf2".to_string());
        let mut synth = SoundFontInstrument::load(&path).unwrap();
        synth
            .configure(Configure::Prepare(ProcessSetup {
                sample_rate: 44100.0,
                max_block_size: 512,
                input_channels: 0,
                output_channels: 2,
            }))
            .unwrap();
        assert!(matches!(
            synth.configure(Configure::SelectProgram(0)).unwrap(),
            Configured::Program { .. }
        ));

        let mut buffer = AudioBuffer::new(2, 4096);
        let mut midi = MidiBuffer::new();
        midi.add_event(MidiMessage::note_on(0, 60, 110), 100);
        {
            let mut block = buffer.block(0, 512);
            synth.process(&mut block, &midi);
            assert!(block.channel(0)[..100].iter().all(|&s| s == 0.0));
        }
        for start in (512..4096).step_by(512) {
            let mut block = buffer.block(start, 512);
            synth.process(&mut block, &MidiBuffer::new());
        }
        assert!(buffer.rms(0, 0, 4096) > 0.001);
    }
}

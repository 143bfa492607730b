//! A simple audio gain effect.
//!
//! Multiplies every channel by a gain given in decibels.

use crate::render::{
    AudioBlock, Configure, Configured, MidiBuffer, ParameterInfo, ProcessingUnit, UnitError,
};
use serde::{Deserialize, Serialize};

pub const MIN_GAIN_DB: f32 = -60.0;
pub const MAX_GAIN_DB: f32 = 24.0;

const GAIN_PARAM: usize = 0;
const BYPASS_PARAM: usize = 1;

/// Restorable state, stored as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct GainState {
    gain_db: f32,
    #[serde(default)]
    bypassed: bool,
}

/// Gain stage with "Gain" (dB) and "Bypass" (0 or 1) parameters.
#[derive(Debug, Clone)]
pub struct GainEffect {
    gain_db: f32,
    bypassed: bool,
}

impl Default for GainEffect {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            bypassed: false,
        }
    }
}

impl GainEffect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    fn set_gain_db(&mut self, value: f32) {
        self.gain_db = value.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
    }

    fn linear_gain(&self) -> f32 {
        10.0_f32.powf(self.gain_db / 20.0)
    }

    fn parameter(&self, index: usize) -> Option<ParameterInfo> {
        let (name, value) = match index {
            GAIN_PARAM => ("Gain", self.gain_db),
            BYPASS_PARAM => ("Bypass", if self.bypassed { 1.0 } else { 0.0 }),
            _ => return None,
        };
        Some(ParameterInfo {
            index,
            name: name.to_string(),
            value,
        })
    }
}

impl ProcessingUnit for GainEffect {
    fn configure(&mut self, request: Configure) -> Result<Configured, UnitError> {
        match request {
            Configure::Prepare(_) => Ok(Configured::Ready),
            Configure::SelectProgram(_) => Err(UnitError::Unsupported("programs")),
            Configure::LoadState(bytes) => {
                let state: GainState = serde_json::from_slice(&bytes)
                    .map_err(|e| UnitError::InvalidState(e.to_string()))?;
                self.set_gain_db(state.gain_db);
                self.bypassed = state.bypassed;
                Ok(Configured::Ready)
            }
            Configure::DescribeParameters => Ok(Configured::Parameters(
                (0..=BYPASS_PARAM).filter_map(|i| self.parameter(i)).collect(),
            )),
            Configure::SetParameter { index, value } => {
                match index {
                    GAIN_PARAM => self.set_gain_db(value),
                    BYPASS_PARAM => self.bypassed = value >= 0.5,
                    _ => return Err(UnitError::ParameterOutOfRange(index)),
                }
                self.parameter(index)
                    .map(Configured::Parameter)
                    .ok_or(UnitError::ParameterOutOfRange(index))
            }
        }
    }

    fn process(&mut self, audio: &mut AudioBlock<'_>, _midi: &MidiBuffer) {
        if self.bypassed {
            return;
        }
        let gain = self.linear_gain();
        // Unity gain is a no-op
        if (gain - 1.0).abs() < 1e-6 {
            return;
        }
        for channel in audio.channels_mut() {
            for sample in channel.iter_mut() {
                *sample *= gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::AudioBuffer;

    fn run(effect: &mut GainEffect, input: f32) -> f32 {
        let mut buffer = AudioBuffer::from_channels(vec![vec![input; 4], vec![input; 4]]);
        let mut block = buffer.block(0, 4);
        effect.process(&mut block, &MidiBuffer::new());
        assert_eq!(block.channel(0), block.channel(1));
        block.channel(0)[0]
    }

    #[test]
    fn test_gain_scales_samples() {
        let mut effect = GainEffect::new();
        assert_eq!(run(&mut effect, 0.5), 0.5);

        effect
            .configure(Configure::SetParameter { index: 0, value: -6.0 })
            .unwrap();
        assert!((run(&mut effect, 1.0) - 0.501187).abs() < 1e-4);

        effect
            .configure(Configure::SetParameter { index: 0, value: 20.0 })
            .unwrap();
        assert!((run(&mut effect, 0.1) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_gain_is_clamped() {
        let mut effect = GainEffect::new();
        let reply = effect
            .configure(Configure::SetParameter { index: 0, value: 100.0 })
            .unwrap();
        assert_eq!(
            reply,
            Configured::Parameter(ParameterInfo {
                index: 0,
                name: "Gain".to_string(),
                value: MAX_GAIN_DB,
            })
        );
        effect
            .configure(Configure::SetParameter { index: 0, value: -500.0 })
            .unwrap();
        assert_eq!(effect.gain_db(), MIN_GAIN_DB);
    }

    #[test]
    fn test_bypass_and_unknown_parameter() {
        let mut effect = GainEffect::new();
        effect
            .configure(Configure::SetParameter { index: 0, value: -20.0 })
            .unwrap();
        effect
            .configure(Configure::SetParameter { index: 1, value: 1.0 })
            .unwrap();
        assert_eq!(run(&mut effect, 0.3), 0.3);

        assert!(matches!(
            effect.configure(Configure::SetParameter { index: 7, value: 0.0 }),
            Err(UnitError::ParameterOutOfRange(7))
        ));
        assert!(matches!(
            effect.configure(Configure::SelectProgram(0)),
            Err(UnitError::Unsupported(_))
        ));
    }

    #[test]
    fn test_state_restore() {
        let mut effect = GainEffect::new();
        effect
            .configure(Configure::LoadState(br#"{"gain_db": -12.0}"#.to_vec()))
            .unwrap();
        assert_eq!(effect.gain_db(), -12.0);

        assert!(matches!(
            effect.configure(Configure::LoadState(vec![0xDE, 0xAD])),
            Err(UnitError::InvalidState(_))
        ));
        assert_eq!(effect.gain_db(), -12.0);
    }
}

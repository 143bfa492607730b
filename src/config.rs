//! Render job configuration.
//!
//! A job is described by one JSON file naming the output, the audio format
//! and an ordered list of processing unit slots. Missing optional keys fall
//! back to the same defaults the renderer has always used.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;
pub const DEFAULT_BIT_DEPTH: u16 = 24;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;
pub const DEFAULT_INSTRUMENT_CHANNELS: usize = 2;

/// Bit depths the WAV writer supports.
pub const SUPPORTED_BIT_DEPTHS: [u16; 3] = [16, 24, 32];

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read configuration {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON configuration: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("missing required field '{0}'")]
    Missing(&'static str),
    #[error("plugin {0} is an instrument but has no midi_file")]
    InstrumentWithoutMidi(usize),
    #[error("plugin {0} has an empty path")]
    EmptyPath(usize),
    #[error("buffer_size must be greater than zero")]
    ZeroBufferSize,
    #[error("no instrument plugin and no input_file: nothing to render")]
    NothingToRender,
}

/// Top-level render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// WAV to run through an effects-only chain.
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_bit_depth")]
    pub bit_depth: u16,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Seconds to render; zero or negative means MIDI length plus a tail.
    #[serde(default)]
    pub render_length: f64,
    #[serde(default = "default_instrument_channels")]
    pub instrument_channels: usize,
    #[serde(default)]
    pub plugins: Option<Vec<SlotConfig>>,
}

/// One processing unit slot, in chain order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    #[serde(default)]
    pub path: String,
    /// Display name; also selects a unit inside multi-unit files.
    #[serde(default)]
    pub plugin_name: Option<String>,
    #[serde(default)]
    pub is_instrument: bool,
    #[serde(default)]
    pub midi_file: Option<PathBuf>,
    #[serde(default = "default_index")]
    pub program_number: i64,
    #[serde(default)]
    pub sysex_file: Option<PathBuf>,
    #[serde(default = "default_index")]
    pub sysex_patch_number: i64,
    /// Raw state blob restored into the unit.
    #[serde(default)]
    pub preset: Option<PathBuf>,
    #[serde(default)]
    pub parameters: ParameterValues,
    #[serde(default)]
    pub export_parameters_before: Option<PathBuf>,
    #[serde(default)]
    pub export_parameters_after: Option<PathBuf>,
}

/// Parameter name/value pairs in the order they appear in the file.
///
/// Names are matched fuzzily, so two entries can land on the same parameter;
/// applying them in file order makes the later entry win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterValues(Vec<(String, f32)>);

impl ParameterValues {
    /// Returns the pairs in file order.
    pub fn as_slice(&self) -> &[(String, f32)] {
        &self.0
    }

    /// Returns the value of the last entry named exactly `name`.
    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.iter().rev().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f32)> for ParameterValues {
    fn from_iter<I: IntoIterator<Item = (String, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for ParameterValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct ParameterValuesVisitor;

impl<'de> Visitor<'de> for ParameterValuesVisitor {
    type Value = ParameterValues;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an object mapping parameter names to numbers")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, value)) = access.next_entry::<String, f32>()? {
            pairs.push((name, value));
        }
        Ok(ParameterValues(pairs))
    }
}

impl<'de> Deserialize<'de> for ParameterValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ParameterValuesVisitor)
    }
}

fn default_sample_rate() -> f64 {
    DEFAULT_SAMPLE_RATE
}

fn default_bit_depth() -> u16 {
    DEFAULT_BIT_DEPTH
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_instrument_channels() -> usize {
    DEFAULT_INSTRUMENT_CHANNELS
}

fn default_index() -> i64 {
    -1
}

impl RenderConfig {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, is not valid JSON, or fails
    /// [`RenderConfig::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Parses and validates a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RenderConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks required fields and that the job has something to render.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_file.as_deref().map_or(true, |p| p.as_os_str().is_empty()) {
            return Err(ConfigError::Missing("output_file"));
        }
        let plugins = self.plugins.as_ref().ok_or(ConfigError::Missing("plugins"))?;
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }

        for (index, slot) in plugins.iter().enumerate() {
            if slot.path.trim().is_empty() {
                return Err(ConfigError::EmptyPath(index));
            }
            if slot.is_instrument && slot.midi_file.is_none() {
                return Err(ConfigError::InstrumentWithoutMidi(index));
            }
        }

        if !self.has_instrument() && self.input_file.is_none() {
            return Err(ConfigError::NothingToRender);
        }
        Ok(())
    }

    pub fn slots(&self) -> &[SlotConfig] {
        self.plugins.as_deref().unwrap_or(&[])
    }

    pub fn has_instrument(&self) -> bool {
        self.slots().iter().any(|s| s.is_instrument)
    }

    /// The slot whose MIDI file drives the render.
    pub fn first_instrument(&self) -> Option<&SlotConfig> {
        self.slots().iter().find(|s| s.is_instrument)
    }

    /// Bit depth actually written: anything unsupported becomes 24.
    pub fn effective_bit_depth(&self) -> u16 {
        if SUPPORTED_BIT_DEPTHS.contains(&self.bit_depth) {
            self.bit_depth
        } else {
            DEFAULT_BIT_DEPTH
        }
    }

    /// Configured sample rate, or `fallback` when it is not positive.
    pub fn sample_rate_or(&self, fallback: f64) -> f64 {
        if self.sample_rate > 0.0 {
            self.sample_rate
        } else {
            fallback
        }
    }
}

impl SlotConfig {
    /// Name used in logs: `plugin_name` if set, otherwise the path.
    pub fn display_name(&self) -> &str {
        self.plugin_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.path)
    }

    /// Program to select, if any.
    pub fn program(&self) -> Option<usize> {
        usize::try_from(self.program_number).ok()
    }
}

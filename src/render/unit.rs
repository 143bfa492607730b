//! The capability interface every processing unit implements.
//!
//! A unit is anything that consumes a block of audio plus MIDI and writes
//! audio back in place: a synthesizer, an effect, or a wrapper around an
//! externally hosted plugin. The renderer only ever talks to units through
//! [`ProcessingUnit::configure`] and [`ProcessingUnit::process`].

use super::{AudioBlock, MidiBuffer};
use serde::Serialize;
use thiserror::Error;

/// Errors reported by units and unit hosts.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The host does not know how to load this unit
    #[error("no processing unit available for '{0}'")]
    UnknownUnit(String),
    /// The unit exists but failed to load
    #[error("failed to load processing unit '{path}': {reason}")]
    Load { path: String, reason: String },
    /// The unit does not support this kind of configuration
    #[error("unit does not support {0}")]
    Unsupported(&'static str),
    /// Program index past the unit's program list
    #[error("program {requested} not available (unit has {available})")]
    ProgramOutOfRange { requested: usize, available: usize },
    /// Parameter index past the unit's parameter list
    #[error("parameter {0} does not exist")]
    ParameterOutOfRange(usize),
    /// State blob rejected by the unit
    #[error("invalid state data: {0}")]
    InvalidState(String),
}

/// Processing settings negotiated before rendering starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSetup {
    pub sample_rate: f64,
    /// Largest block the unit will be asked to process.
    pub max_block_size: usize,
    pub input_channels: usize,
    pub output_channels: usize,
}

/// A named, normalised or unit-specific parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterInfo {
    pub index: usize,
    pub name: String,
    pub value: f32,
}

/// Configuration requests, issued before the render loop starts.
#[derive(Debug, Clone, PartialEq)]
pub enum Configure {
    /// Negotiate sample rate, block size and channel layout.
    Prepare(ProcessSetup),
    /// Switch to a built-in program.
    SelectProgram(usize),
    /// Restore a raw state blob.
    LoadState(Vec<u8>),
    /// List the unit's parameters with their current values.
    DescribeParameters,
    /// Set one parameter.
    SetParameter { index: usize, value: f32 },
}

/// Successful replies to [`Configure`] requests.
#[derive(Debug, Clone, PartialEq)]
pub enum Configured {
    Ready,
    Program { name: String },
    Parameters(Vec<ParameterInfo>),
    Parameter(ParameterInfo),
}

/// An opaque audio/MIDI processor.
///
/// `process` is called once per block in chain order. Instruments receive the
/// block's MIDI and a silent block to fill; effects receive an empty MIDI
/// buffer and transform the audio already present.
pub trait ProcessingUnit {
    fn configure(&mut self, request: Configure) -> Result<Configured, UnitError>;

    fn process(&mut self, audio: &mut AudioBlock<'_>, midi: &MidiBuffer);
}

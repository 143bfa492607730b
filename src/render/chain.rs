//! Ordered chain of processing units.
//!
//! Each slot owns one unit for the duration of a render and remembers whether
//! it is an instrument (fed MIDI, fills silence) or an effect (transforms
//! audio). All per-slot setup happens here, before the render loop starts.

use super::unit::{Configure, Configured, ParameterInfo, ProcessSetup, ProcessingUnit, UnitError};
use super::{AudioBlock, MidiBuffer};
use crate::midi::MidiMessage;
use tracing::{debug, info, warn};

/// Scratch block used to deliver setup-time SysEx.
const SYSEX_SCRATCH_CHANNELS: usize = 2;
const SYSEX_SCRATCH_SAMPLES: usize = 512;

/// Role of a unit in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Instrument,
    Effect,
}

/// One configured unit in the chain.
pub struct ProcessingUnitSlot {
    name: String,
    kind: UnitKind,
    program: Option<usize>,
    unit: Box<dyn ProcessingUnit>,
}

impl std::fmt::Debug for ProcessingUnitSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingUnitSlot")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl ProcessingUnitSlot {
    pub fn new(name: impl Into<String>, kind: UnitKind, unit: Box<dyn ProcessingUnit>) -> Self {
        Self {
            name: name.into(),
            kind,
            program: None,
            unit,
        }
    }

    pub fn instrument(name: impl Into<String>, unit: Box<dyn ProcessingUnit>) -> Self {
        Self::new(name, UnitKind::Instrument, unit)
    }

    pub fn effect(name: impl Into<String>, unit: Box<dyn ProcessingUnit>) -> Self {
        Self::new(name, UnitKind::Effect, unit)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn is_instrument(&self) -> bool {
        self.kind == UnitKind::Instrument
    }

    /// The program selected during setup, if any.
    pub fn program(&self) -> Option<usize> {
        self.program
    }

    /// Runs the unit over one block.
    pub fn process(&mut self, audio: &mut AudioBlock<'_>, midi: &MidiBuffer) {
        self.unit.process(audio, midi);
    }

    /// Negotiates sample rate, block size and channel layout.
    pub fn prepare(&mut self, setup: ProcessSetup) -> Result<(), UnitError> {
        debug!(slot = %self.name, ?setup, "preparing unit");
        self.unit.configure(Configure::Prepare(setup))?;
        Ok(())
    }

    /// Selects a program and returns its name.
    pub fn select_program(&mut self, index: usize) -> Result<String, UnitError> {
        let name = match self.unit.configure(Configure::SelectProgram(index))? {
            Configured::Program { name } => name,
            _ => format!("Program {}", index),
        };
        self.program = Some(index);
        info!(slot = %self.name, program = index, %name, "program selected");
        Ok(name)
    }

    /// Delivers a SysEx message through one `process` call on a scratch block.
    pub fn inject_sysex(&mut self, message: Vec<u8>) {
        let mut midi = MidiBuffer::new();
        let len = message.len();
        midi.add_event(MidiMessage::SysEx(message), 0);

        let mut scratch = vec![vec![0.0f32; SYSEX_SCRATCH_SAMPLES]; SYSEX_SCRATCH_CHANNELS];
        let mut block =
            AudioBlock::from_slices(scratch.iter_mut().map(|c| c.as_mut_slice()).collect());
        self.unit.process(&mut block, &midi);
        info!(slot = %self.name, bytes = len, "SysEx sent to unit");
    }

    /// Restores a raw state blob.
    pub fn load_state(&mut self, state: Vec<u8>) -> Result<(), UnitError> {
        let len = state.len();
        self.unit.configure(Configure::LoadState(state))?;
        info!(slot = %self.name, bytes = len, "state restored");
        Ok(())
    }

    /// Lists the unit's parameters with current values.
    pub fn parameters(&mut self) -> Result<Vec<ParameterInfo>, UnitError> {
        match self.unit.configure(Configure::DescribeParameters)? {
            Configured::Parameters(params) => Ok(params),
            _ => Ok(Vec::new()),
        }
    }

    /// Sets parameters by fuzzy name, in the order given.
    ///
    /// When two names match the same parameter the later one wins.
    ///
    /// # Returns
    ///
    /// The requested names that matched no parameter
    pub fn apply_parameters(
        &mut self,
        requested: &[(String, f32)],
    ) -> Result<Vec<String>, UnitError> {
        if requested.is_empty() {
            return Ok(Vec::new());
        }
        let params = self.parameters()?;
        let mut unmatched = Vec::new();

        for (name, value) in requested {
            let value = *value;
            match find_parameter(&params, name) {
                Some(param) => {
                    let applied = match self.unit.configure(Configure::SetParameter {
                        index: param.index,
                        value,
                    })? {
                        Configured::Parameter(info) => info.value,
                        _ => value,
                    };
                    info!(slot = %self.name, parameter = %param.name, value = applied, "parameter set");
                }
                None => {
                    warn!(slot = %self.name, parameter = %name, "parameter not found");
                    unmatched.push(name.clone());
                }
            }
        }
        Ok(unmatched)
    }
}

/// Finds the first parameter whose name equals `name` or contains it,
/// ignoring case.
pub fn find_parameter<'p>(params: &'p [ParameterInfo], name: &str) -> Option<&'p ParameterInfo> {
    let needle = name.to_lowercase();
    params
        .iter()
        .find(|p| p.name == name || p.name.to_lowercase().contains(&needle))
}

/// Units in processing order.
#[derive(Debug, Default)]
pub struct ProcessingUnitChain {
    slots: Vec<ProcessingUnitSlot>,
}

impl ProcessingUnitChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, slot: ProcessingUnitSlot) {
        self.slots.push(slot);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn has_instrument(&self) -> bool {
        self.slots.iter().any(ProcessingUnitSlot::is_instrument)
    }

    pub fn slots(&self) -> &[ProcessingUnitSlot] {
        &self.slots
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ProcessingUnitSlot> {
        self.slots.iter_mut()
    }
}

//! vstrender - Offline MIDI renderer for instrument and effect chains.
//!
//! This library provides the MIDI timeline, SysEx bank handling, the block
//! render scheduler and the processing unit chain behind the `vstrender`
//! binary.

pub mod audio;
pub mod config;
pub mod host;
pub mod midi;
pub mod render;
pub mod sysex;
pub mod units;

// Re-export commonly used types
pub use config::{ParameterValues, RenderConfig, SlotConfig};
pub use midi::{MidiMessage, MidiTimeline, TimedEvent};
pub use render::{
    AudioBuffer, MidiBuffer, ProcessingUnit, ProcessingUnitChain, ProcessingUnitSlot, RenderStats,
};
pub use sysex::SysExPatch;

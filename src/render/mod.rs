//! Block-based rendering: buffers, the unit interface, the chain and the
//! scheduler that drives it.

mod buffer;
mod chain;
mod scheduler;
mod unit;

pub use buffer::{AudioBlock, AudioBuffer, BlockEvent, MidiBuffer};
pub use chain::{find_parameter, ProcessingUnitChain, ProcessingUnitSlot, UnitKind};
pub use scheduler::{process_in_place, render, EventCursor, RenderStats};
pub use unit::{Configure, Configured, ParameterInfo, ProcessSetup, ProcessingUnit, UnitError};

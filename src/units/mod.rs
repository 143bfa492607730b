//! Processing units that ship with the renderer, and the host that
//! instantiates units from slot configuration.
//!
//! External plugin formats plug in by implementing [`UnitHost`]; the
//! renderer itself never looks past the [`ProcessingUnit`] interface.

mod gain;
mod soundfont;

pub use gain::{GainEffect, MAX_GAIN_DB, MIN_GAIN_DB};
pub use soundfont::{SoundFontInstrument, PROGRAM_COUNT};

use crate::config::SlotConfig;
use crate::render::{ProcessingUnit, UnitError};
use std::path::Path;
use tracing::debug;

/// Path prefix for units built into the renderer.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Creates processing units for configured slots.
pub trait UnitHost {
    fn instantiate(&self, slot: &SlotConfig) -> Result<Box<dyn ProcessingUnit>, UnitError>;
}

/// Resolves `*.sf2` paths to SoundFont instruments and `builtin:gain` to a
/// gain effect.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinHost;

impl BuiltinHost {
    pub fn new() -> Self {
        Self
    }
}

impl UnitHost for BuiltinHost {
    fn instantiate(&self, slot: &SlotConfig) -> Result<Box<dyn ProcessingUnit>, UnitError> {
        debug!(path = %slot.path, "instantiating unit");
        if let Some(name) = slot.path.strip_prefix(BUILTIN_PREFIX) {
            return match name {
                "gain" => Ok(Box::new(GainEffect::new())),
                _ => Err(UnitError::UnknownUnit(slot.path.clone())),
            };
        }

        let is_soundfont = Path::new(&slot.path)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sf2"));
        if is_soundfont {
            return Ok(Box::new(SoundFontInstrument::load(&slot.path)?));
        }

        Err(UnitError::UnknownUnit(slot.path.clone()))
    }
}

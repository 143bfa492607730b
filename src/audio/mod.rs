//! WAV file input and output.
//!
//! Rendered audio is written through [`write_wav`]; effects-only jobs decode
//! their source with [`read_wav`]. Both use planar [`AudioBuffer`]s.
//!
//! [`AudioBuffer`]: crate::render::AudioBuffer

pub mod export;
pub mod import;

pub use export::{partial_path, write_wav};
pub use import::{read_wav, WavAudio};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or writing WAV files.
#[derive(Debug, Error)]
pub enum AudioIoError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot write audio with no channels")]
    NoChannels,
    #[error("invalid output path: {0}")]
    InvalidPath(PathBuf),
    #[error("unsupported WAV format: {bits}-bit {format}")]
    Unsupported { bits: u16, format: &'static str },
}

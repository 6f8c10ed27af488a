//! Error taxonomy for module loading.
//!
//! `Context::init` itself reports success as a plain bool-shaped
//! `Option`, matching the C `pocketmod_init` contract spec'd for this
//! engine, but the loader that backs it is built from fallible steps
//! and it is useful to know *why* a load was rejected when testing or
//! reporting from the CLI front-end.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ModError {
    #[error("input is too small to contain a MOD header")]
    TooSmall,

    #[error("song title contains non-ASCII bytes")]
    InvalidTitleAscii,

    #[error("sample name contains non-ASCII bytes")]
    InvalidSampleNameAscii,

    #[error("module uses {found} channels, but this build supports at most {max}")]
    TooManyChannels { found: u8, max: u8 },

    #[error("sample {index} exceeds the compiled-in sample capacity")]
    SampleTooLarge { index: usize },

    #[error("song length {0} is out of the valid 1..=128 range")]
    InvalidLength(u8),

    #[error("order entry {index} references pattern data past the end of the file")]
    PatternOutOfBounds { index: usize },

    #[error("pattern data extends past the end of the file")]
    PatternDataTruncated,

    #[error("sample rate must be positive")]
    InvalidRate,

    #[error("input buffer is empty")]
    EmptyInput,
}

//! Error type for the fallible helpers around the controller.
//!
//! The controller never fails on the wire; faults there only set the
//! status error bit. These errors cover save states and host scripts.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("save state too small ({0} bytes)")]
    StateTooSmall(usize),

    #[error("invalid save state (bad magic)")]
    BadMagic,

    #[error("unsupported save state version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("decompress error: {0}")]
    Decompress(String),

    #[error("serialize error: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("invalid hex byte {0:?}")]
    HexByte(String),

    #[error("empty transaction")]
    EmptyTransaction,

    #[error("controller still busy after {0} ticks")]
    NotReady(u32),
}

pub type Result<T> = std::result::Result<T, Error>;

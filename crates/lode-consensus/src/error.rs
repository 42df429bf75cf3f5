//! Consensus error types.

use thiserror::Error;

/// Errors returned by consensus validation and difficulty conversion code.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Invalid compact target encoding in `bits`.
    #[error("invalid compact target bits")]
    InvalidBits,

    /// Target decoded to zero or otherwise unusable.
    #[error("invalid difficulty target")]
    InvalidTarget,

    /// Proof-of-work hash did not meet the required target.
    #[error("insufficient proof of work")]
    InsufficientPoW,

    /// Header fields violated basic consensus constraints.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// A referenced block or header was not found.
    #[error("unknown block: {0}")]
    UnknownBlock(&'static str),

    /// The Hive proof embedded in a coinbase failed validation.
    #[error("hive proof rejected: {0}")]
    HiveProof(&'static str),

    /// Core-layer failure (serialization, script parsing).
    #[error(transparent)]
    Core(#[from] lode_core::CoreError),
}

//! Miner error types.

use lode_consensus::ConsensusError;
use lode_core::CoreError;
use thiserror::Error;

/// Errors surfaced by block assembly and the mining loops.
#[derive(Debug, Error)]
pub enum MinerError {
    /// The wallet could not supply what mining needs (keys, scripts).
    #[error("wallet unavailable: {0}")]
    Wallet(&'static str),

    /// Block assembly failed outright.
    #[error("block assembly failed: {0}")]
    Assembly(&'static str),

    /// The assembled block did not pass validity checks.
    #[error("template validation failed: {0}")]
    InvalidTemplate(String),

    /// The rebuilt coinbase scriptSig exceeded the size limit.
    #[error("coinbase scriptSig exceeds size limit")]
    ScriptSigTooLong,

    /// Consensus-layer failure.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Core-layer failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Lode consensus rules for the dual-mode chain.
//!
//! This crate is responsible for:
//! - compact difficulty target encoding/decoding (Bitcoin-style `bits`)
//! - PoW and Hive difficulty retargeting
//! - proof-of-work validation against the target
//! - Hive proof validation (the consensus-critical dwarf check)
//! - block subsidy schedules and chain-work accounting
//!
//! It intentionally does **not** include networking, mempool policy, or
//! state updates.

pub mod difficulty;
pub mod error;
pub mod hive;
pub mod retarget;
pub mod subsidy;
pub mod work;

pub use difficulty::*;
pub use error::*;
pub use hive::*;
pub use retarget::*;
pub use subsidy::*;
pub use work::*;

#![forbid(unsafe_code)]

//! Lode block production: the assembler, the PoW miner, and the Hive
//! dwarf master.
//!
//! External collaborators (chain state, mempool, wallet, networking) are
//! consumed through the contracts in [`context`] and [`mempool`]; the node
//! wires concrete implementations, tests use in-memory fakes.

pub mod assembler;
pub mod context;
pub mod error;
pub mod hive;
pub mod mempool;
pub mod options;
pub mod pow;

pub use assembler::{AssemblerOptions, BlockAssembler, BlockMode, BlockTemplate};
pub use context::{ChainView, DctInfo, DwarfStatus, NetworkView, TipInfo, WalletView};
pub use error::MinerError;
pub use hive::{busy_dwarves, DwarfMaster, DwarfRange, HiveOptions, HiveSolution};
pub use mempool::{MempoolEntry, MempoolView, StaticMempool};
pub use options::MinerArgs;
pub use pow::{
    increment_extra_nonce, scan_hash, update_time, HashrateMeter, MinerContext, PowMiner,
};

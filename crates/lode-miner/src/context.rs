//! Contracts the miners consume from the rest of the node.
//!
//! Chain state, UTXO set, wallet, and networking are external collaborators.
//! Only their query surfaces appear here; `lode-node` provides one concrete
//! implementation, tests provide in-memory fakes.

use k256::ecdsa::SigningKey;
use lode_consensus::{BlockReader, HeaderSource, UtxoView};
use lode_core::{Block, Hash32, KeyId, Script, TxId};

/// Snapshot of the active chain tip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TipInfo {
    /// Tip block hash.
    pub hash: Hash32,
    /// Tip height.
    pub height: u64,
    /// Tip header timestamp.
    pub time: u64,
}

/// Chain state as consumed by block assembly and the mining loops.
///
/// Implementations synchronize internally; miners call from worker threads.
pub trait ChainView: HeaderSource + UtxoView + BlockReader + Send + Sync {
    /// Current tip snapshot.
    fn tip(&self) -> TipInfo;

    /// Median time past of the block with the given hash.
    fn median_time_past(&self, hash: &Hash32) -> Option<u64>;

    /// Network-adjusted wall-clock time.
    fn adjusted_time(&self) -> u64;

    /// Whether witness-carrying transactions may be mined.
    fn witness_enabled(&self) -> bool {
        true
    }

    /// Full contextual validation of a candidate block, without connecting it.
    fn test_block_validity(&self, block: &Block) -> Result<(), String>;

    /// Hand a solved block to the chain processor.
    fn submit_block(&self, block: Block) -> Result<(), String>;
}

/// Networking facts the miners gate on.
pub trait NetworkView: Send + Sync {
    /// Number of connected peers.
    fn peer_count(&self) -> usize;

    /// Whether the node is still in initial block download.
    fn is_initial_block_download(&self) -> bool;
}

/// Maturity of a dwarf-creation transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DwarfStatus {
    /// Still gestating; dwarves cannot mine yet.
    Immature,
    /// Dwarves are live.
    Mature,
    /// Past the lifespan; dwarves are dead.
    Expired,
}

/// One wallet-owned dwarf-creation transaction.
#[derive(Clone, Debug)]
pub struct DctInfo {
    /// Transaction id of the DCT.
    pub txid: TxId,
    /// Destination the Hive reward must pay.
    pub reward_key: KeyId,
    /// Whether the DCT carries a community contribution.
    pub community_contrib: bool,
    /// Number of dwarves the DCT minted.
    pub dwarf_count: u64,
    /// Confirmation height.
    pub height: u64,
    /// Current maturity.
    pub status: DwarfStatus,
}

/// Wallet surface: key custody and dwarf enumeration.
pub trait WalletView: Send + Sync {
    /// All dwarf-creation transactions the wallet owns.
    fn dcts(&self) -> Vec<DctInfo>;

    /// Private key for one of our destinations.
    fn signing_key(&self, key_id: &KeyId) -> Option<SigningKey>;

    /// Reserved coinbase destination script for PoW mining.
    fn mining_script(&self) -> Option<Script>;

    /// Persist the reserved coinbase key after a block is accepted.
    fn keep_script(&self);

    /// Whether the wallet is locked (keys unavailable).
    fn is_locked(&self) -> bool;
}

// Consensus-critical. Changes require spec update + tests.
//! Per-network consensus parameters.
//!
//! One immutable [`ConsensusParams`] value is constructed at startup and
//! shared read-only by every subsystem. Difficulty limits are stored in
//! compact `bits` form; all limit values are exactly representable.

use crate::types::{Amount, BlockHeader, KeyId};
use crate::Script;

/// Static consensus rules for one network.
#[derive(Clone, Debug)]
pub struct ConsensusParams {
    /// Easiest permitted PoW target, compact encoding.
    pub pow_limit_bits: u32,
    /// Looser PoW limit in force during the initial distribution phase.
    pub pow_limit_initial_bits: u32,
    /// Easiest permitted dwarf-hash target, compact encoding.
    pub pow_limit_hive_bits: u32,

    /// Target seconds between PoW blocks.
    pub pow_target_spacing: u64,
    /// Permit min-difficulty blocks after long gaps (testnet only).
    pub allow_min_difficulty_blocks: bool,
    /// Blocks are produced on demand; network checks are bypassed (regtest).
    pub mine_blocks_on_demand: bool,

    /// Number of Hive blocks averaged by the Hive retarget.
    pub hive_difficulty_window: u64,
    /// Desired total-block spacing between Hive blocks.
    pub hive_block_spacing_target: u64,
    /// Height below which the Hive retarget walk stops.
    pub min_hive_check_block: u64,
    /// Longest permitted run of Hive blocks without an intervening PoW block.
    pub max_consecutive_hive_blocks: u64,

    /// Blocks a dwarf-creation transaction takes to mature.
    pub dwarf_gestation_blocks: u64,
    /// Blocks a mature dwarf stays alive.
    pub dwarf_lifespan_blocks: u64,
    /// Cost of minting a single dwarf.
    pub dwarf_cost: Amount,
    /// Divisor in the community contribution equation.
    pub community_contrib_factor: u64,
    /// Destination of community contributions.
    pub community_key_id: KeyId,
    /// Destination dwarf-creation payments must pay.
    pub dwarf_creation_key_id: KeyId,

    /// Header nonce value marking Hive-mined blocks.
    pub hive_nonce_marker: u32,
    /// Header nonce value marking Pop-mined blocks.
    pub pop_nonce_marker: u32,

    /// Length of the post-distribution slow start, in blocks.
    pub slow_start_blocks: u64,
    /// Final block height of the initial distribution phase.
    pub last_initial_distribution_height: u64,

    /// Spacing of RNG (burn-vote) blocks.
    pub rng_block_spacing: u64,
    /// Confirmations a burn transaction needs before it can vote.
    pub burn_block_confirmations: u64,
    /// Smallest burn amount that earns votes.
    pub min_burn_amount: Amount,
    /// Burned atoms per vote.
    pub burn_vote_ratio: u64,

    /// Blocks between PoW subsidy halvings.
    pub subsidy_halving_interval: u64,
    /// PoW block subsidy before halvings.
    pub pow_initial_subsidy: Amount,
    /// Fixed Hive block subsidy.
    pub hive_subsidy: Amount,
    /// Pop block subsidy for private games.
    pub pop_subsidy_private: Amount,
    /// Pop block subsidy for public games.
    pub pop_subsidy_public: Amount,
}

impl ConsensusParams {
    /// Main network rules.
    pub fn mainnet() -> Self {
        Self {
            pow_limit_bits: 0x1e0f_ffff,
            pow_limit_initial_bits: 0x1f0f_ffff,
            pow_limit_hive_bits: 0x1f07_ffff,
            pow_target_spacing: 120,
            allow_min_difficulty_blocks: false,
            mine_blocks_on_demand: false,
            hive_difficulty_window: 24,
            hive_block_spacing_target: 2,
            min_hive_check_block: 100,
            max_consecutive_hive_blocks: 2,
            dwarf_gestation_blocks: 48 * 24,
            dwarf_lifespan_blocks: 48 * 24 * 14,
            dwarf_cost: Amount::from_atoms(crate::ATOMS_PER_LODE / 4),
            community_contrib_factor: 10,
            community_key_id: KeyId([0x11; 20]),
            dwarf_creation_key_id: KeyId([0x22; 20]),
            hive_nonce_marker: 192,
            pop_nonce_marker: 193,
            slow_start_blocks: 2000,
            last_initial_distribution_height: 500,
            rng_block_spacing: 100,
            burn_block_confirmations: 5,
            min_burn_amount: Amount::from_atoms(crate::ATOMS_PER_LODE),
            burn_vote_ratio: crate::ATOMS_PER_LODE / 10,
            subsidy_halving_interval: 840_000,
            pow_initial_subsidy: Amount::from_atoms(5 * crate::ATOMS_PER_LODE),
            hive_subsidy: Amount::from_atoms(2 * crate::ATOMS_PER_LODE),
            pop_subsidy_private: Amount::from_atoms(crate::ATOMS_PER_LODE / 2),
            pop_subsidy_public: Amount::from_atoms(crate::ATOMS_PER_LODE),
        }
    }

    /// Test network rules: same shape, faster clocks, min-difficulty escape.
    pub fn testnet() -> Self {
        Self {
            allow_min_difficulty_blocks: true,
            last_initial_distribution_height: 50,
            slow_start_blocks: 100,
            min_hive_check_block: 20,
            dwarf_gestation_blocks: 48,
            dwarf_lifespan_blocks: 48 * 14,
            ..Self::mainnet()
        }
    }

    /// Regression-test rules: trivial difficulty, no network requirements.
    pub fn regtest() -> Self {
        Self {
            pow_limit_bits: 0x207f_ffff,
            pow_limit_initial_bits: 0x207f_ffff,
            pow_limit_hive_bits: 0x207f_ffff,
            pow_target_spacing: 1,
            allow_min_difficulty_blocks: true,
            mine_blocks_on_demand: true,
            hive_difficulty_window: 8,
            hive_block_spacing_target: 2,
            min_hive_check_block: 0,
            max_consecutive_hive_blocks: 4,
            dwarf_gestation_blocks: 4,
            dwarf_lifespan_blocks: 64,
            dwarf_cost: Amount::from_atoms(10_000),
            community_contrib_factor: 10,
            community_key_id: KeyId([0x11; 20]),
            dwarf_creation_key_id: KeyId([0x22; 20]),
            hive_nonce_marker: 192,
            pop_nonce_marker: 193,
            slow_start_blocks: 0,
            last_initial_distribution_height: 0,
            rng_block_spacing: 20,
            burn_block_confirmations: 2,
            min_burn_amount: Amount::from_atoms(1000),
            burn_vote_ratio: 100,
            subsidy_halving_interval: 150,
            pow_initial_subsidy: Amount::from_atoms(5 * crate::ATOMS_PER_LODE),
            hive_subsidy: Amount::from_atoms(2 * crate::ATOMS_PER_LODE),
            pop_subsidy_private: Amount::from_atoms(crate::ATOMS_PER_LODE / 2),
            pop_subsidy_public: Amount::from_atoms(crate::ATOMS_PER_LODE),
        }
    }

    /// Locking script dwarf-creation payments must pay.
    pub fn dwarf_creation_script(&self) -> Script {
        Script::p2pkh(&self.dwarf_creation_key_id)
    }

    /// Locking script of the community contribution destination.
    pub fn community_script(&self) -> Script {
        Script::p2pkh(&self.community_key_id)
    }

    /// Total blocks from DCT confirmation to dwarf expiry.
    pub fn total_dwarf_lifespan(&self) -> u64 {
        self.dwarf_gestation_blocks + self.dwarf_lifespan_blocks
    }

    /// First height at which Hive blocks are accepted.
    pub fn hive_enable_height(&self) -> u64 {
        self.last_initial_distribution_height + self.slow_start_blocks
    }
}

impl BlockHeader {
    /// Returns true if this header marks a Hive-mined block.
    pub fn is_hive_mined(&self, params: &ConsensusParams) -> bool {
        self.nonce == params.hive_nonce_marker
    }

    /// Returns true if this header marks a Pop-mined block.
    pub fn is_pop_mined(&self, params: &ConsensusParams) -> bool {
        self.nonce == params.pop_nonce_marker
    }
}

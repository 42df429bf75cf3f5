//! Protocol-wide constants for Lode v0.

/// Protocol semantic version (v0).
pub const PROTOCOL_VERSION: u16 = 0;

/// Length in bytes of a 32-byte hash.
pub const HASH32_LEN: usize = 32;

/// Length in bytes of a key-id (hash of a public key).
pub const KEY_ID_LEN: usize = 20;

/// Number of atomic units per one Lode coin.
///
/// 1 LODE = 10^8 atoms.
pub const ATOMS_PER_LODE: u64 = 100_000_000;

/// Witness data is discounted by this factor in block weight accounting.
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Maximum block weight.
pub const MAX_BLOCK_WEIGHT: u64 = 4_000_000;

/// Maximum total signature-operation cost per block.
pub const MAX_BLOCK_SIGOPS_COST: u64 = 80_000;

/// Block weight reserved for the coinbase transaction during assembly.
pub const COINBASE_WEIGHT_RESERVE: u64 = 4_000;

/// Sigops cost reserved for the coinbase transaction during assembly.
pub const COINBASE_SIGOPS_RESERVE: u64 = 400;

/// Maximum size of the coinbase scriptSig in bytes.
pub const MAX_COINBASE_SCRIPT_SIG: usize = 100;

/// Maximum serialized transaction size (in bytes) accepted anywhere.
pub const MAX_TX_BYTES: usize = 400_000;

/// Length in bytes of an encoded Hive proof script.
///
/// `OP_RETURN OP_DWARF` plus five length-prefixed pushes:
/// 2 + (1+4) + (1+4) + 1 + (1+64) + (1+65).
pub const HIVE_PROOF_SCRIPT_LEN: usize = 144;

/// Domain separator used when hashing block headers.
///
/// Prevents cross-domain hash collisions.
pub const DS_BLOCK_HEADER: &[u8] = b"LODE::BLOCK_HEADER::V0";

/// Domain separator used when hashing transactions.
pub const DS_TX: &[u8] = b"LODE::TX::V0";

/// Domain separator for the Minotaur arbitrary-input hash.
pub const DS_MINOTAUR: &[u8] = b"LODE::MINOTAUR::V0";

/// Domain separator for merkle interior nodes.
pub const DS_MERKLE_NODE: &[u8] = b"LODE::MERKLE_NODE::V0";

/// Domain separator for merkle leaves.
pub const DS_MERKLE_LEAF: &[u8] = b"LODE::MERKLE_LEAF::V0";

/// Domain separator for the deterministic per-window rand string.
pub const DS_DETERMINISTIC_RAND: &[u8] = b"LODE::DET_RAND::V0";

/// Domain separator for the Hive proof message hash (what the miner signs).
pub const DS_HIVE_MESSAGE: &[u8] = b"LODE::HIVE_MESSAGE::V0";

/// Domain separator for the coinbase witness commitment.
pub const DS_WITNESS_COMMITMENT: &[u8] = b"LODE::WITNESS_COMMITMENT::V0";

/// Tag bytes that introduce the witness commitment inside the coinbase output.
pub const WITNESS_COMMITMENT_TAG: [u8; 4] = [0x4c, 0x57, 0x43, 0x00];

/// Base58 address version prefix.
pub const ADDRESS_PREFIX: u8 = 0x30;

/// Arbitrary data appended to the coinbase scriptSig by the in-process miner.
pub const COINBASE_FLAGS: &[u8] = b"/lode/";

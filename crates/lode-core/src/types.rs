// Consensus-critical. Changes require spec update + tests.
//! Canonical protocol types for Lode v0.
//!
//! This module defines all consensus-visible data structures and primitive
//! value types used across the protocol. All types here must remain
//! backward-compatible once released.

use crate::constants::*;
use crate::script::Script;
use borsh::{BorshDeserialize, BorshSerialize};
use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Errors related to parsing, validation, or construction of core protocol types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Hex string had an unexpected byte length.
    #[error("invalid hex length: expected {expected} bytes, got {got} bytes")]
    InvalidHexLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes provided.
        got: usize,
    },

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Arithmetic overflow or underflow occurred.
    #[error("amount overflow or underflow")]
    AmountOverflow,

    /// A script could not be parsed or constructed.
    #[error("invalid script: {0}")]
    InvalidScript(&'static str),

    /// An address string could not be decoded.
    #[error("invalid address: {0}")]
    InvalidAddress(&'static str),

    /// A value violated protocol constraints.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
}

/// Fixed-size 32-byte hash used throughout the protocol.
///
/// Displayed big-endian; comparisons against difficulty targets interpret
/// the bytes as a big-endian 256-bit integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hash32(pub [u8; HASH32_LEN]);

impl Hash32 {
    /// Returns an all-zero hash.
    pub const fn zero() -> Self {
        Self([0u8; HASH32_LEN])
    }

    /// Returns the underlying byte array.
    pub const fn as_bytes(&self) -> &[u8; HASH32_LEN] {
        &self.0
    }

    /// Returns true if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH32_LEN]
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; HASH32_LEN]> for Hash32 {
    fn from(value: [u8; HASH32_LEN]) -> Self {
        Self(value)
    }
}

impl From<Hash32> for [u8; HASH32_LEN] {
    fn from(value: Hash32) -> Self {
        value.0
    }
}

impl FromStr for Hash32 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH32_LEN {
            return Err(CoreError::InvalidHexLength {
                expected: HASH32_LEN,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; HASH32_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

/// Block hash type.
pub type BlockHash = Hash32;

/// Transaction identifier type.
pub type TxId = Hash32;

/// 20-byte hash of a public key; the payload of a standard address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyId(pub [u8; KEY_ID_LEN]);

impl KeyId {
    /// Returns the underlying byte array.
    pub const fn as_bytes(&self) -> &[u8; KEY_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", hex::encode(self.0))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Amount expressed in the smallest unit ("atoms").
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Amount(pub u64);

impl Amount {
    /// Returns a zero amount.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Constructs an amount from atoms.
    pub const fn from_atoms(atoms: u64) -> Self {
        Self(atoms)
    }

    /// Returns the underlying atom value.
    pub const fn atoms(self) -> u64 {
        self.0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Amount) -> Result<Self, CoreError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Amount) -> Result<Self, CoreError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(CoreError::AmountOverflow)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({} atoms)", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} atoms", self.0)
    }
}

/// Reference to a transaction output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OutPoint {
    /// Identifier of the transaction holding the output.
    pub txid: TxId,
    /// Index of the output within that transaction.
    pub vout: u32,
}

impl OutPoint {
    /// The null outpoint carried by a coinbase input.
    pub const fn null() -> Self {
        Self {
            txid: Hash32::zero(),
            vout: u32::MAX,
        }
    }

    /// Returns true for the coinbase null prevout.
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

/// Transaction input.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TxIn {
    /// Output being spent (null for coinbase).
    pub prevout: OutPoint,
    /// Unlocking script. For coinbase: height, extra-nonce, miner flags.
    pub script_sig: Script,
    /// Relative-locktime / finality sequence number.
    pub sequence: u32,
    /// Segregated witness stack; empty for non-witness spends.
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    /// A coinbase input with the given scriptSig.
    pub fn coinbase(script_sig: Script) -> Self {
        Self {
            prevout: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
            witness: Vec::new(),
        }
    }
}

/// Transaction output.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TxOut {
    /// Value carried by the output.
    pub value: Amount,
    /// Locking script.
    pub script_pubkey: Script,
}

/// Absolute lock-time values at or above this threshold are Unix timestamps;
/// below it they are block heights.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Transparent transaction container (v0).
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transaction {
    /// Protocol version for this transaction.
    pub version: u16,
    /// Inputs; exactly one null-prevout input for coinbase.
    pub inputs: Vec<TxIn>,
    /// Outputs.
    pub outputs: Vec<TxOut>,
    /// Absolute lock time (height or timestamp, see [`LOCKTIME_THRESHOLD`]).
    pub lock_time: u32,
}

impl Transaction {
    /// Returns true if this is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Returns true if any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// A copy of this transaction with all witness stacks cleared.
    pub fn without_witness(&self) -> Self {
        let mut tx = self.clone();
        for input in &mut tx.inputs {
            input.witness.clear();
        }
        tx
    }

    /// Serialized size in bytes (canonical encoding, witness included).
    pub fn total_size(&self) -> usize {
        borsh::to_vec(self).map(|b| b.len()).unwrap_or(0)
    }

    /// Block weight of this transaction: `3 * stripped_size + total_size`.
    pub fn weight(&self) -> u64 {
        let total = self.total_size() as u64;
        let stripped = borsh::to_vec(&self.without_witness())
            .map(|b| b.len() as u64)
            .unwrap_or(total);
        stripped * (WITNESS_SCALE_FACTOR - 1) + total
    }

    /// Finality check against the next block height and the lock-time cutoff
    /// (median time past of the chain tip).
    pub fn is_final(&self, height: u64, lock_time_cutoff: u64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let reference = if self.lock_time < LOCKTIME_THRESHOLD {
            height
        } else {
            lock_time_cutoff
        };
        if u64::from(self.lock_time) < reference {
            return true;
        }
        self.inputs.iter().all(|i| i.sequence == u32::MAX)
    }

    /// Returns true if this transaction is a dwarf-creation transaction,
    /// i.e. `outputs[0]` carries a DCT script paying the given creation
    /// destination.
    pub fn is_dct(&self, creation_script: &Script) -> bool {
        !self.is_coinbase()
            && self
                .outputs
                .first()
                .map(|o| o.script_pubkey.parse_dct(creation_script).is_some())
                .unwrap_or(false)
    }

    /// Performs basic structural validation.
    pub fn validate_sanity(&self) -> Result<(), CoreError> {
        if self.version != PROTOCOL_VERSION {
            return Err(CoreError::InvalidValue("unsupported transaction version"));
        }
        if self.inputs.is_empty() {
            return Err(CoreError::InvalidValue("transaction has no inputs"));
        }
        if self.outputs.is_empty() {
            return Err(CoreError::InvalidValue("transaction has no outputs"));
        }
        if self.is_coinbase() {
            if self.inputs[0].script_sig.len() > MAX_COINBASE_SCRIPT_SIG {
                return Err(CoreError::InvalidValue("coinbase scriptSig too large"));
            }
        } else if self.inputs.iter().any(|i| i.prevout.is_null()) {
            return Err(CoreError::InvalidValue("null prevout outside coinbase"));
        }
        Ok(())
    }
}

/// Block header containing consensus-critical metadata.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u16,
    /// Hash of the previous block.
    pub prev: BlockHash,
    /// Merkle root of transaction identifiers.
    pub merkle_root: Hash32,
    /// Block timestamp (Unix seconds).
    pub time: u64,
    /// Compact difficulty target.
    pub bits: u32,
    /// Proof-of-work nonce, or a production-mode marker for Hive/Pop blocks.
    pub nonce: u32,
}

/// Full block (header + transactions).
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,
    /// Transactions included in this block; `txs[0]` must be coinbase.
    pub txs: Vec<Transaction>,
}

impl Block {
    /// Performs basic structural validation.
    pub fn validate_sanity(&self) -> Result<(), CoreError> {
        if self.header.version != PROTOCOL_VERSION {
            return Err(CoreError::InvalidValue("unsupported block version"));
        }
        if self.txs.is_empty() {
            return Err(CoreError::InvalidValue("block has no transactions"));
        }
        if !self.txs[0].is_coinbase() {
            return Err(CoreError::InvalidValue("first transaction not coinbase"));
        }
        if self.txs[1..].iter().any(|t| t.is_coinbase()) {
            return Err(CoreError::InvalidValue("duplicate coinbase"));
        }
        for tx in &self.txs {
            tx.validate_sanity()?;
        }
        Ok(())
    }

    /// Total block weight.
    pub fn weight(&self) -> u64 {
        self.txs.iter().map(|t| t.weight()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_coinbase() -> Transaction {
        Transaction {
            version: PROTOCOL_VERSION,
            inputs: vec![TxIn::coinbase(Script::new())],
            outputs: vec![TxOut {
                value: Amount::from_atoms(50),
                script_pubkey: Script::new(),
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn coinbase_detection() {
        let cb = dummy_coinbase();
        assert!(cb.is_coinbase());

        let mut spend = cb.clone();
        spend.inputs[0].prevout = OutPoint {
            txid: Hash32([7u8; 32]),
            vout: 0,
        };
        assert!(!spend.is_coinbase());
    }

    #[test]
    fn witness_weight_discount() {
        let mut tx = dummy_coinbase();
        let bare = tx.weight();
        tx.inputs[0].witness = vec![vec![0u8; 100]];
        let with_witness = tx.weight();
        // 100 witness bytes cost well under 4x their size.
        assert!(with_witness > bare);
        assert!(with_witness < bare + 4 * 100);
    }

    #[test]
    fn finality_rules() {
        let mut tx = dummy_coinbase();
        assert!(tx.is_final(0, 0), "zero lock time is always final");

        tx.lock_time = 100;
        tx.inputs[0].sequence = 0;
        assert!(!tx.is_final(100, 0), "height lock not yet expired");
        assert!(tx.is_final(101, 0), "height lock expired");

        tx.lock_time = LOCKTIME_THRESHOLD + 50;
        assert!(!tx.is_final(1_000_000, u64::from(LOCKTIME_THRESHOLD)));
        assert!(tx.is_final(0, u64::from(LOCKTIME_THRESHOLD) + 51));
    }

    #[test]
    fn block_requires_single_leading_coinbase() {
        let cb = dummy_coinbase();
        let header = BlockHeader {
            version: PROTOCOL_VERSION,
            prev: Hash32::zero(),
            merkle_root: Hash32::zero(),
            time: 1,
            bits: 0x207f_ffff,
            nonce: 0,
        };

        let ok = Block {
            header: header.clone(),
            txs: vec![cb.clone()],
        };
        ok.validate_sanity().expect("single coinbase accepted");

        let dup = Block {
            header,
            txs: vec![cb.clone(), cb],
        };
        assert!(dup.validate_sanity().is_err());
    }
}

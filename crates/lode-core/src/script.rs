// Consensus-critical. Changes require spec update + tests.
//! Minimal script encoding for coinbase and standard outputs.
//!
//! Lode does not run a general script interpreter. Scripts are byte vectors
//! with a tiny, fixed vocabulary: number pushes for the coinbase scriptSig,
//! pay-to-key-hash outputs, and the `OP_RETURN`-based encodings used by
//! dwarf-creation transactions and the Hive block proof.

use crate::constants::KEY_ID_LEN;
use crate::types::{CoreError, KeyId};
use borsh::{BorshDeserialize, BorshSerialize};
use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Script opcodes understood by the protocol.
pub mod opcodes {
    /// Push an empty value (numeric zero / false).
    pub const OP_0: u8 = 0x00;
    /// Alias of [`OP_0`].
    pub const OP_FALSE: u8 = 0x00;
    /// Largest direct push length; larger pushes use [`OP_PUSHDATA1`].
    pub const MAX_DIRECT_PUSH: u8 = 0x4b;
    /// One-byte length prefix follows.
    pub const OP_PUSHDATA1: u8 = 0x4c;
    /// Push numeric one / true.
    pub const OP_TRUE: u8 = 0x51;
    /// Unspendable data carrier.
    pub const OP_RETURN: u8 = 0x6a;
    /// Duplicate top stack item.
    pub const OP_DUP: u8 = 0x76;
    /// Verify top two items are equal.
    pub const OP_EQUALVERIFY: u8 = 0x88;
    /// Hash top item to a key-id.
    pub const OP_HASH160: u8 = 0xa9;
    /// Check a signature.
    pub const OP_CHECKSIG: u8 = 0xac;
    /// Check a signature, then verify.
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
    /// Marker introducing a Hive proof payload after `OP_RETURN`.
    pub const OP_DWARF: u8 = 0xd2;
}

use opcodes::*;

/// A raw script: opcodes and length-prefixed data pushes.
#[derive(Clone, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Script(pub Vec<u8>);

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", hex::encode(&self.0))
    }
}

/// One decoded script instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    /// A bare opcode.
    Op(u8),
    /// A data push.
    Push(&'a [u8]),
}

impl Script {
    /// An empty script.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw script bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw byte view.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Script length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty script.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a bare opcode.
    pub fn push_opcode(mut self, op: u8) -> Self {
        self.0.push(op);
        self
    }

    /// Append a length-prefixed data push.
    ///
    /// Pushes up to 75 bytes use a direct length byte; longer pushes use
    /// `OP_PUSHDATA1`. Larger payloads are rejected — nothing in the
    /// protocol needs them.
    pub fn push_data(mut self, data: &[u8]) -> Result<Self, CoreError> {
        if data.len() <= MAX_DIRECT_PUSH as usize {
            self.0.push(data.len() as u8);
        } else if data.len() <= u8::MAX as usize {
            self.0.push(OP_PUSHDATA1);
            self.0.push(data.len() as u8);
        } else {
            return Err(CoreError::InvalidScript("push too large"));
        }
        self.0.extend_from_slice(data);
        Ok(self)
    }

    /// Append a minimally-encoded integer push (heights, extra-nonces).
    ///
    /// 0 encodes as `OP_0`, 1..=16 as the small-number opcodes, anything
    /// larger as a little-endian byte push with a sign guard byte when the
    /// top bit is set.
    pub fn push_int(mut self, value: i64) -> Self {
        if value == 0 {
            self.0.push(OP_0);
            return self;
        }
        if (1..=16).contains(&value) {
            self.0.push(0x50 + value as u8);
            return self;
        }

        let negative = value < 0;
        let mut abs = value.unsigned_abs();
        let mut bytes = Vec::new();
        while abs > 0 {
            bytes.push((abs & 0xff) as u8);
            abs >>= 8;
        }
        if bytes.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
            bytes.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            let last = bytes.len() - 1;
            bytes[last] |= 0x80;
        }
        self.0.push(bytes.len() as u8);
        self.0.extend_from_slice(&bytes);
        self
    }

    /// Concatenate another script onto this one.
    pub fn concat(mut self, other: &Script) -> Self {
        self.0.extend_from_slice(&other.0);
        self
    }

    /// Decode the script into instructions, bounds-checking every push.
    pub fn instructions(&self) -> Result<Vec<Instruction<'_>>, CoreError> {
        let mut out = Vec::new();
        let bytes = &self.0;
        let mut i = 0usize;
        while i < bytes.len() {
            let op = bytes[i];
            i += 1;
            if op >= 1 && op <= MAX_DIRECT_PUSH {
                let len = op as usize;
                let end = i.checked_add(len).ok_or(CoreError::InvalidScript("push overflow"))?;
                if end > bytes.len() {
                    return Err(CoreError::InvalidScript("push past end of script"));
                }
                out.push(Instruction::Push(&bytes[i..end]));
                i = end;
            } else if op == OP_PUSHDATA1 {
                if i >= bytes.len() {
                    return Err(CoreError::InvalidScript("truncated pushdata length"));
                }
                let len = bytes[i] as usize;
                i += 1;
                let end = i.checked_add(len).ok_or(CoreError::InvalidScript("push overflow"))?;
                if end > bytes.len() {
                    return Err(CoreError::InvalidScript("push past end of script"));
                }
                out.push(Instruction::Push(&bytes[i..end]));
                i = end;
            } else {
                out.push(Instruction::Op(op));
            }
        }
        Ok(out)
    }

    /// Standard pay-to-key-hash locking script.
    pub fn p2pkh(key_id: &KeyId) -> Self {
        let mut s = Vec::with_capacity(25);
        s.push(OP_DUP);
        s.push(OP_HASH160);
        s.push(KEY_ID_LEN as u8);
        s.extend_from_slice(key_id.as_bytes());
        s.push(OP_EQUALVERIFY);
        s.push(OP_CHECKSIG);
        Self(s)
    }

    /// Extract the destination key-id from a standard locking script.
    pub fn extract_destination(&self) -> Option<KeyId> {
        let b = &self.0;
        if b.len() == 25
            && b[0] == OP_DUP
            && b[1] == OP_HASH160
            && b[2] == KEY_ID_LEN as u8
            && b[23] == OP_EQUALVERIFY
            && b[24] == OP_CHECKSIG
        {
            let mut id = [0u8; KEY_ID_LEN];
            id.copy_from_slice(&b[3..23]);
            return Some(KeyId(id));
        }
        None
    }

    /// Dwarf-creation output script: pays the creation destination, then
    /// embeds the reward destination behind an `OP_RETURN`.
    pub fn dct(creation_script: &Script, reward: &KeyId) -> Self {
        let mut s = creation_script.0.clone();
        s.push(OP_RETURN);
        s.push(KEY_ID_LEN as u8);
        s.extend_from_slice(reward.as_bytes());
        Self(s)
    }

    /// Parse a dwarf-creation script, returning the embedded reward
    /// destination if the script pays `creation_script`.
    pub fn parse_dct(&self, creation_script: &Script) -> Option<KeyId> {
        let prefix = creation_script.as_bytes();
        let b = &self.0;
        let expected_len = prefix.len() + 2 + KEY_ID_LEN;
        if b.len() != expected_len || !b.starts_with(prefix) {
            return None;
        }
        if b[prefix.len()] != OP_RETURN || b[prefix.len() + 1] != KEY_ID_LEN as u8 {
            return None;
        }
        let mut id = [0u8; KEY_ID_LEN];
        id.copy_from_slice(&b[prefix.len() + 2..]);
        Some(KeyId(id))
    }

    /// Legacy signature-operation count.
    ///
    /// Counts `OP_CHECKSIG`/`OP_CHECKSIGVERIFY`; malformed trailing pushes
    /// terminate the count rather than erroring, matching permissive legacy
    /// counting.
    pub fn sigop_count(&self) -> u64 {
        match self.instructions() {
            Ok(instrs) => instrs
                .iter()
                .filter(|i| matches!(i, Instruction::Op(OP_CHECKSIG) | Instruction::Op(OP_CHECKSIGVERIFY)))
                .count() as u64,
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_push_minimal_encoding() {
        let s = Script::new().push_int(0);
        assert_eq!(s.as_bytes(), &[OP_0]);

        let s = Script::new().push_int(5);
        assert_eq!(s.as_bytes(), &[0x55]);

        let s = Script::new().push_int(17);
        assert_eq!(s.as_bytes(), &[0x01, 0x11]);

        // 128 needs a sign guard byte.
        let s = Script::new().push_int(128);
        assert_eq!(s.as_bytes(), &[0x02, 0x80, 0x00]);

        let s = Script::new().push_int(520_000);
        assert_eq!(s.as_bytes(), &[0x03, 0x40, 0xef, 0x07]);
    }

    #[test]
    fn p2pkh_roundtrip() {
        let key = KeyId([0xab; KEY_ID_LEN]);
        let script = Script::p2pkh(&key);
        assert_eq!(script.len(), 25);
        assert_eq!(script.extract_destination(), Some(key));
        assert_eq!(script.sigop_count(), 1);

        // A data-carrier script has no destination.
        let data = Script::new()
            .push_opcode(OP_RETURN)
            .push_data(b"hello")
            .unwrap();
        assert_eq!(data.extract_destination(), None);
        assert_eq!(data.sigop_count(), 0);
    }

    #[test]
    fn dct_script_roundtrip() {
        let creation = Script::p2pkh(&KeyId([1u8; KEY_ID_LEN]));
        let reward = KeyId([2u8; KEY_ID_LEN]);
        let dct = Script::dct(&creation, &reward);

        assert_eq!(dct.parse_dct(&creation), Some(reward));

        // Wrong creation destination does not parse.
        let other = Script::p2pkh(&KeyId([9u8; KEY_ID_LEN]));
        assert_eq!(dct.parse_dct(&other), None);

        // A plain p2pkh is not a DCT.
        assert_eq!(creation.parse_dct(&creation), None);
    }

    #[test]
    fn truncated_push_rejected() {
        let s = Script::from_bytes(vec![0x05, 0x01, 0x02]);
        assert!(s.instructions().is_err());

        let s = Script::from_bytes(vec![OP_PUSHDATA1]);
        assert!(s.instructions().is_err());
    }

    #[test]
    fn pushdata1_used_for_long_pushes() {
        let data = [0u8; 100];
        let s = Script::new().push_data(&data).unwrap();
        assert_eq!(s.as_bytes()[0], OP_PUSHDATA1);
        assert_eq!(s.as_bytes()[1], 100);
        let instrs = s.instructions().unwrap();
        assert_eq!(instrs, vec![Instruction::Push(&data[..])]);
    }
}

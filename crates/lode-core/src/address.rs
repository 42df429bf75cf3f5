//! Base58 address encoding for standard destinations.
//!
//! Layout: `prefix(1) || key_id(20) || checksum(4)` where the checksum is
//! the first four bytes of a BLAKE3 hash over the prefix and key-id.

use crate::constants::{ADDRESS_PREFIX, KEY_ID_LEN};
use crate::types::{CoreError, KeyId};

const CHECKSUM_LEN: usize = 4;

/// Derive the key-id for a SEC1-encoded public key.
pub fn key_id_from_pubkey(pubkey: &[u8]) -> KeyId {
    let mut h = blake3::Hasher::new();
    h.update(pubkey);
    let mut out = [0u8; KEY_ID_LEN];
    h.finalize_xof().fill(&mut out);
    KeyId(out)
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = blake3::hash(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest.as_bytes()[..CHECKSUM_LEN]);
    out
}

/// Encode a key-id as a base58 address string.
pub fn encode_address(key_id: &KeyId) -> String {
    let mut payload = Vec::with_capacity(1 + KEY_ID_LEN + CHECKSUM_LEN);
    payload.push(ADDRESS_PREFIX);
    payload.extend_from_slice(key_id.as_bytes());
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload).into_string()
}

/// Decode a base58 address string back to its key-id.
pub fn decode_address(address: &str) -> Result<KeyId, CoreError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|_| CoreError::InvalidAddress("not base58"))?;
    if bytes.len() != 1 + KEY_ID_LEN + CHECKSUM_LEN {
        return Err(CoreError::InvalidAddress("wrong length"));
    }
    if bytes[0] != ADDRESS_PREFIX {
        return Err(CoreError::InvalidAddress("wrong prefix"));
    }
    let (payload, check) = bytes.split_at(1 + KEY_ID_LEN);
    if checksum(payload) != check {
        return Err(CoreError::InvalidAddress("bad checksum"));
    }
    let mut id = [0u8; KEY_ID_LEN];
    id.copy_from_slice(&payload[1..]);
    Ok(KeyId(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip() {
        let id = key_id_from_pubkey(&[0x02; 33]);
        let addr = encode_address(&id);
        assert_eq!(decode_address(&addr).unwrap(), id);
    }

    #[test]
    fn corrupt_address_rejected() {
        let id = KeyId([7u8; KEY_ID_LEN]);
        let mut addr = encode_address(&id);
        // Flip a character; both checksum and prefix failures must reject.
        let flipped = if addr.ends_with('1') { '2' } else { '1' };
        addr.pop();
        addr.push(flipped);
        assert!(decode_address(&addr).is_err());

        assert!(decode_address("not-an-address").is_err());
    }
}

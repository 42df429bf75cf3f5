// Consensus-critical. Changes require spec update + tests.
//! Transaction Merkle trees.
//!
//! The header commits to a pairwise BLAKE3 tree over txids. Leaves and
//! interior nodes are domain-separated; an odd node at any level is paired
//! with itself. The witness tree replaces the coinbase leaf with zero so the
//! commitment can live inside the coinbase itself.

use crate::constants::{DS_MERKLE_LEAF, DS_MERKLE_NODE, DS_WITNESS_COMMITMENT};
use crate::serialization::{hash32, txid, wtxid};
use crate::types::{Block, CoreError, Hash32};

/// Compute the Merkle root over a list of 32-byte ids.
pub fn merkle_root(ids: &[Hash32]) -> Hash32 {
    if ids.is_empty() {
        return Hash32::zero();
    }

    let mut level: Vec<Hash32> = ids
        .iter()
        .map(|id| hash32(DS_MERKLE_LEAF, id.as_bytes()))
        .collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / 2 + 1);
        for pair in level.chunks(2) {
            let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
            next.push(parent_hash(&pair[0], right));
        }
        level = next;
    }
    level[0]
}

/// Merkle root over the txids of a block's transactions.
///
/// Must be recomputed whenever the coinbase changes (extra-nonce bumps).
pub fn block_merkle_root(block: &Block) -> Result<Hash32, CoreError> {
    let ids = block
        .txs
        .iter()
        .map(txid)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(merkle_root(&ids))
}

/// Witness Merkle root: wtxids with the coinbase leaf zeroed.
pub fn block_witness_merkle_root(block: &Block) -> Result<Hash32, CoreError> {
    let mut ids = Vec::with_capacity(block.txs.len());
    for (i, tx) in block.txs.iter().enumerate() {
        if i == 0 {
            ids.push(Hash32::zero());
        } else {
            ids.push(wtxid(tx)?);
        }
    }
    Ok(merkle_root(&ids))
}

/// The witness commitment value carried in the coinbase.
pub fn witness_commitment(witness_root: &Hash32) -> Hash32 {
    hash32(DS_WITNESS_COMMITMENT, witness_root.as_bytes())
}

fn parent_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(left.as_bytes());
    bytes[32..].copy_from_slice(right.as_bytes());
    hash32(DS_MERKLE_NODE, &bytes)
}

// Consensus-critical. Changes require spec update + tests.
//! Difficulty retargeting for both block-production modes.
//!
//! PoW retargeting is a 24-block simple moving average over PoW blocks only;
//! Hive-mined blocks are skipped both at the tip and inside the window.
//! Hive retargeting averages the targets of recent Hive blocks and scales by
//! how many total blocks the window spans versus how many it should span.

use crate::difficulty::{bits_to_target, hash_meets_target, target_to_bits};
use crate::error::ConsensusError;
use lode_core::{ConsensusParams, Hash32};
use num_bigint::BigUint;
use num_traits::Zero;
use tracing::debug;

/// Number of PoW blocks averaged by the PoW retarget.
pub const POW_RETARGET_WINDOW: u64 = 24;

/// Window size for median-time-past.
pub const MTP_WINDOW: usize = 11;

/// Summary of one chain-indexed header, as consumed by the retarget walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Block hash.
    pub hash: Hash32,
    /// Parent block hash.
    pub prev: Hash32,
    /// Height in the chain.
    pub height: u64,
    /// Header timestamp.
    pub time: u64,
    /// Compact difficulty bits.
    pub bits: u32,
    /// Header nonce (carries the Hive/Pop marker).
    pub nonce: u32,
}

impl HeaderInfo {
    /// Returns true if this header marks a Hive-mined block.
    pub fn is_hive_mined(&self, params: &ConsensusParams) -> bool {
        self.nonce == params.hive_nonce_marker
    }

    /// Returns true if this header marks a Pop-mined block.
    pub fn is_pop_mined(&self, params: &ConsensusParams) -> bool {
        self.nonce == params.pop_nonce_marker
    }
}

/// Read-only access to the header index of the active chain.
pub trait HeaderSource {
    /// Look up a header summary by block hash.
    fn header(&self, hash: &Hash32) -> Option<HeaderInfo>;
}

/// Walk to the parent, treating a missing parent as the end of the chain.
fn parent(source: &impl HeaderSource, h: &HeaderInfo) -> Option<HeaderInfo> {
    if h.height == 0 {
        return None;
    }
    source.header(&h.prev)
}

/// Compute the required compact target for the PoW block following `tip`.
///
/// `new_block_time` is the candidate header's timestamp; it only matters for
/// the testnet min-difficulty escape hatch.
pub fn next_work_required(
    source: &impl HeaderSource,
    tip: &Hash32,
    new_block_time: u64,
    params: &ConsensusParams,
) -> Result<u32, ConsensusError> {
    let mut last = source
        .header(tip)
        .ok_or(ConsensusError::UnknownBlock("retarget tip"))?;

    // Initial distribution runs at its own, much looser limit.
    if last.height < params.last_initial_distribution_height {
        return Ok(params.pow_limit_initial_bits);
    }

    // Testnet: drop to the limit when no block has arrived for ten spacings.
    if params.allow_min_difficulty_blocks
        && new_block_time > last.time + params.pow_target_spacing * 10
    {
        return Ok(params.pow_limit_bits);
    }

    let pow_limit = bits_to_target(params.pow_limit_bits)?;

    // Skip over Hive-mined blocks at the tip.
    while last.is_hive_mined(params) {
        match parent(source, &last) {
            Some(p) => last = p,
            None => return Ok(params.pow_limit_bits),
        }
    }

    // Average the previous POW_RETARGET_WINDOW PoW targets, dividing each
    // term to keep the accumulator well below 2^256.
    let mut cursor = last;
    let mut avg_target = BigUint::zero();
    for _ in 0..POW_RETARGET_WINDOW {
        while cursor.is_hive_mined(params) {
            match parent(source, &cursor) {
                Some(p) => cursor = p,
                None => return Ok(params.pow_limit_bits),
            }
        }
        avg_target += bits_to_target(cursor.bits)? / POW_RETARGET_WINDOW;
        match parent(source, &cursor) {
            Some(p) => cursor = p,
            None => return Ok(params.pow_limit_bits),
        }
    }

    let target_timespan = POW_RETARGET_WINDOW * params.pow_target_spacing;
    let mut actual_timespan = last.time.saturating_sub(cursor.time);
    actual_timespan = actual_timespan.clamp(target_timespan / 3, target_timespan * 3);

    let mut new_target = avg_target * actual_timespan / target_timespan;
    if new_target > pow_limit {
        new_target = pow_limit;
    }

    target_to_bits(&new_target)
}

/// Compute the required compact dwarf-hash target for a Hive block
/// following `tip`.
pub fn next_hive_work_required(
    source: &impl HeaderSource,
    tip: &Hash32,
    params: &ConsensusParams,
) -> Result<u32, ConsensusError> {
    let hive_limit = bits_to_target(params.pow_limit_hive_bits)?;

    let mut sum_target = BigUint::zero();
    let mut hive_blocks = 0u64;
    let mut total_blocks = 0u64;

    // Step back until the window holds enough Hive blocks or the chain
    // bottoms out.
    let mut cursor = source
        .header(tip)
        .ok_or(ConsensusError::UnknownBlock("hive retarget tip"))?;
    while hive_blocks < params.hive_difficulty_window
        && cursor.height >= params.min_hive_check_block
    {
        let Some(prev) = parent(source, &cursor) else {
            break;
        };
        if cursor.is_hive_mined(params) {
            sum_target += bits_to_target(cursor.bits)?;
            hive_blocks += 1;
        }
        total_blocks += 1;
        cursor = prev;
    }

    if hive_blocks == 0 {
        // Only happens while the chain is starting up.
        debug!("next_hive_work_required: no previous hive blocks found");
        return Ok(params.pow_limit_hive_bits);
    }

    let avg_target = sum_target / hive_blocks;

    let target_total_blocks = hive_blocks * params.hive_block_spacing_target;
    let mut new_target = avg_target * total_blocks / target_total_blocks;
    if new_target > hive_limit {
        new_target = hive_limit;
    }

    target_to_bits(&new_target)
}

/// Verify a PoW digest against claimed compact bits.
///
/// The range check uses the initial-distribution limit, the loosest target
/// any era of the chain permits.
pub fn check_proof_of_work(
    hash: &Hash32,
    bits: u32,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    let target = bits_to_target(bits)?;
    let loosest = bits_to_target(params.pow_limit_initial_bits)?;
    if target > loosest {
        return Err(ConsensusError::InvalidTarget);
    }
    if !hash_meets_target(hash.as_bytes(), &target) {
        return Err(ConsensusError::InsufficientPoW);
    }
    Ok(())
}

/// Compute Median-Time-Past over the last up-to-11 timestamps
/// (oldest-first slice).
pub fn median_time_past(timestamps: &[u64]) -> Option<u64> {
    if timestamps.is_empty() {
        return None;
    }
    let start = timestamps.len().saturating_sub(MTP_WINDOW);
    let mut buf: Vec<u64> = timestamps[start..].to_vec();
    buf.sort_unstable();
    let mid = buf.len() / 2;
    Some(buf[mid])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_time_past_windowed() {
        let ts: Vec<u64> = (0..20).collect();
        let mtp = median_time_past(&ts).expect("mtp");
        assert_eq!(mtp, 14); // median of last 11 timestamps [9..19]
    }

    #[test]
    fn pow_check_boundary() {
        let params = lode_core::ConsensusParams::regtest();
        // All-zero digest always passes at the regtest limit.
        check_proof_of_work(&Hash32::zero(), params.pow_limit_bits, &params).expect("zero digest");

        // All-ones digest never passes.
        assert!(matches!(
            check_proof_of_work(&Hash32([0xff; 32]), params.pow_limit_bits, &params),
            Err(ConsensusError::InsufficientPoW)
        ));

        // Claiming a target looser than the loosest limit is rejected outright.
        assert!(matches!(
            check_proof_of_work(&Hash32::zero(), 0x2100_ffff, &params),
            Err(ConsensusError::InvalidTarget)
        ));
    }
}

//! Retargeting behavior over synthetic header chains.

use std::collections::HashMap;

use lode_consensus::{
    bits_to_target, next_hive_work_required, next_work_required, target_to_bits, HeaderInfo,
    HeaderSource,
};
use lode_core::{ConsensusParams, Hash32};

struct FakeChain {
    headers: HashMap<Hash32, HeaderInfo>,
    tip: Hash32,
}

impl HeaderSource for FakeChain {
    fn header(&self, hash: &Hash32) -> Option<HeaderInfo> {
        self.headers.get(hash).copied()
    }
}

fn hash_for(height: u64) -> Hash32 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    bytes[31] = 0x99;
    Hash32(bytes)
}

/// Build a chain from (bits, time, nonce) specs, genesis first.
fn build_chain(specs: &[(u32, u64, u32)]) -> FakeChain {
    let mut headers = HashMap::new();
    let mut prev = Hash32::zero();
    let mut tip = Hash32::zero();
    for (height, (bits, time, nonce)) in specs.iter().enumerate() {
        let hash = hash_for(height as u64);
        headers.insert(
            hash,
            HeaderInfo {
                hash,
                prev,
                height: height as u64,
                time: *time,
                bits: *bits,
                nonce: *nonce,
            },
        );
        prev = hash;
        tip = hash;
    }
    FakeChain { headers, tip }
}

fn regtest_like_mainnet() -> ConsensusParams {
    // Mainnet rules but with the distribution phase collapsed so short
    // synthetic chains exercise the real retarget path.
    ConsensusParams {
        last_initial_distribution_height: 0,
        slow_start_blocks: 0,
        ..ConsensusParams::mainnet()
    }
}

#[test]
fn steady_state_keeps_target() {
    let params = regtest_like_mainnet();
    let bits = params.pow_limit_bits;
    let spacing = params.pow_target_spacing;

    let specs: Vec<(u32, u64, u32)> = (0..40).map(|i| (bits, 1_000 + i * spacing, 1)).collect();
    let chain = build_chain(&specs);

    let tip_time = specs.last().unwrap().1;
    let next = next_work_required(&chain, &chain.tip, tip_time + spacing, &params).unwrap();

    // Average of identical targets over an exact window: unchanged (up to
    // the per-term division rounding absorbed by compact encoding).
    assert_eq!(next, bits);
}

#[test]
fn fast_blocks_harden_and_clamp() {
    let params = regtest_like_mainnet();
    let bits = params.pow_limit_bits;

    // Blocks arriving instantly: actual timespan clamps to T/3.
    let specs: Vec<(u32, u64, u32)> = (0..40).map(|i| (bits, 1_000 + i, 1)).collect();
    let chain = build_chain(&specs);
    let tip_time = specs.last().unwrap().1;

    let next = next_work_required(&chain, &chain.tip, tip_time, &params).unwrap();

    let expected = {
        let window = 24u64;
        let mut avg = num_bigint::BigUint::default();
        for _ in 0..window {
            avg += bits_to_target(bits).unwrap() / window;
        }
        let target_timespan = window * params.pow_target_spacing;
        target_to_bits(&(avg * (target_timespan / 3) / target_timespan)).unwrap()
    };
    assert_eq!(next, expected);
    assert!(
        bits_to_target(next).unwrap() < bits_to_target(bits).unwrap(),
        "fast blocks must harden the target"
    );
}

#[test]
fn slow_blocks_ease_but_respect_limit() {
    let params = regtest_like_mainnet();
    let bits = params.pow_limit_bits;
    let spacing = params.pow_target_spacing;

    // Ten spacings per block: actual timespan clamps to 3T, but the result
    // cannot exceed the pow limit.
    let specs: Vec<(u32, u64, u32)> = (0..40)
        .map(|i| (bits, 1_000 + i * spacing * 10, 1))
        .collect();
    let chain = build_chain(&specs);
    let tip_time = specs.last().unwrap().1;

    let next = next_work_required(&chain, &chain.tip, tip_time, &params).unwrap();
    assert_eq!(next, params.pow_limit_bits);
}

#[test]
fn hive_blocks_are_skipped_by_pow_retarget() {
    let params = regtest_like_mainnet();
    let bits = params.pow_limit_bits;
    let spacing = params.pow_target_spacing;
    let hive_marker = params.hive_nonce_marker;

    // PoW-only chain: blocks at exact spacing.
    let pow_only: Vec<(u32, u64, u32)> =
        (0..40).map(|i| (bits, 1_000 + i * spacing, 1)).collect();
    let pow_chain = build_chain(&pow_only);
    let tip_time = pow_only.last().unwrap().1 + spacing;
    let expected = next_work_required(&pow_chain, &pow_chain.tip, tip_time, &params).unwrap();

    // Same PoW cadence with a Hive block (wild bits) after every PoW block.
    // Hive blocks share their parent's timestamp so the window anchor time
    // is identical in both chains.
    let mut mixed: Vec<(u32, u64, u32)> = Vec::new();
    for i in 0..40u64 {
        mixed.push((bits, 1_000 + i * spacing, 1));
        mixed.push((0x2077_ffff, 1_000 + i * spacing, hive_marker));
    }
    // Keep a PoW block on top so both tips see the same last PoW time.
    mixed.push((bits, 1_000 + 40 * spacing, 1));
    let mixed_chain = build_chain(&mixed);
    let mixed_tip_time = 1_000 + 41 * spacing;
    let got = next_work_required(&mixed_chain, &mixed_chain.tip, mixed_tip_time, &params).unwrap();

    assert_eq!(got, expected, "hive blocks must not influence the average");
}

#[test]
fn initial_distribution_returns_floor_bits() {
    let params = ConsensusParams::mainnet();
    let specs: Vec<(u32, u64, u32)> = (0..10)
        .map(|i| (params.pow_limit_bits, 1_000 + i * 60, 1))
        .collect();
    let chain = build_chain(&specs);

    // Tip height 9 is far below the distribution boundary.
    let next = next_work_required(&chain, &chain.tip, 10_000, &params).unwrap();
    assert_eq!(next, params.pow_limit_initial_bits);
}

#[test]
fn testnet_min_difficulty_after_long_gap() {
    let params = ConsensusParams {
        last_initial_distribution_height: 0,
        slow_start_blocks: 0,
        ..ConsensusParams::testnet()
    };
    let hard_bits = 0x1d00_ffff;
    let spacing = params.pow_target_spacing;

    let specs: Vec<(u32, u64, u32)> = (0..40).map(|i| (hard_bits, 1_000 + i * spacing, 1)).collect();
    let chain = build_chain(&specs);
    let tip_time = specs.last().unwrap().1;

    // A candidate more than ten spacings late drops to the limit.
    let late = next_work_required(&chain, &chain.tip, tip_time + spacing * 10 + 1, &params).unwrap();
    assert_eq!(late, params.pow_limit_bits);

    // A timely candidate retargets normally.
    let timely = next_work_required(&chain, &chain.tip, tip_time + spacing, &params).unwrap();
    assert_ne!(timely, params.pow_limit_bits);
}

#[test]
fn hive_retarget_without_hive_blocks_returns_limit() {
    let params = ConsensusParams::regtest();
    let specs: Vec<(u32, u64, u32)> = (0..20)
        .map(|i| (params.pow_limit_bits, 1_000 + i, 1))
        .collect();
    let chain = build_chain(&specs);

    let next = next_hive_work_required(&chain, &chain.tip, &params).unwrap();
    assert_eq!(next, params.pow_limit_hive_bits);
}

#[test]
fn hive_retarget_scales_with_block_density() {
    let params = ConsensusParams::regtest();
    let hive_bits = 0x2040_0000u32; // exactly halvable mantissa
    let marker = params.hive_nonce_marker;

    // One hive block every `hive_block_spacing_target` blocks: on target,
    // the average is returned unchanged.
    let mut specs: Vec<(u32, u64, u32)> = vec![(params.pow_limit_bits, 1_000, 1)];
    for i in 0..24u64 {
        if i % params.hive_block_spacing_target == 0 {
            specs.push((hive_bits, 1_001 + i, marker));
        } else {
            specs.push((params.pow_limit_bits, 1_001 + i, 1));
        }
    }
    let chain = build_chain(&specs);
    assert_eq!(
        next_hive_work_required(&chain, &chain.tip, &params).unwrap(),
        hive_bits
    );

    // Every block hive-mined: twice as dense as targeted, so the target
    // halves (harder).
    let mut dense: Vec<(u32, u64, u32)> = vec![(params.pow_limit_bits, 1_000, 1)];
    for i in 0..16u64 {
        dense.push((hive_bits, 1_001 + i, marker));
    }
    let dense_chain = build_chain(&dense);
    assert_eq!(
        next_hive_work_required(&dense_chain, &dense_chain.tip, &params).unwrap(),
        0x2020_0000
    );
}

//! End-to-end Hive proof validation against a synthetic chain.

use std::collections::HashMap;

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::rand_core::OsRng;
use lode_consensus::{
    bits_to_target, check_hive_proof, deterministic_rand_string, dwarf_hash, hash_below_target,
    hive_message_hash, network_hive_info, sign_compact, BlockReader, Coin, ConsensusError,
    HeaderInfo, HeaderSource, HiveProof, UtxoView,
};
use lode_core::{
    block_merkle_root, key_id_from_pubkey, txid, Amount, Block, BlockHeader, ConsensusParams,
    Hash32, KeyId, OutPoint, Script, Transaction, TxIn, TxOut, PROTOCOL_VERSION,
};

struct FakeChain {
    headers: HashMap<Hash32, HeaderInfo>,
    blocks: HashMap<Hash32, Block>,
    utxos: HashMap<OutPoint, Coin>,
    tip: Hash32,
}

impl HeaderSource for FakeChain {
    fn header(&self, hash: &Hash32) -> Option<HeaderInfo> {
        self.headers.get(hash).copied()
    }
}

impl BlockReader for FakeChain {
    fn block(&self, hash: &Hash32) -> Option<Block> {
        self.blocks.get(hash).cloned()
    }
}

impl UtxoView for FakeChain {
    fn coin(&self, out: &OutPoint) -> Option<Coin> {
        self.utxos.get(out).cloned()
    }
}

fn hash_for(height: u64) -> Hash32 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    bytes[31] = 0x55;
    Hash32(bytes)
}

/// A chain of PoW blocks plus one confirmed DCT, and everything needed to
/// build a Hive block on top of it.
struct Fixture {
    params: ConsensusParams,
    chain: FakeChain,
    key: SigningKey,
    reward_key: KeyId,
    dct_tx: Transaction,
    dct_txid: Hash32,
    dct_height: u64,
    det_rand: String,
}

const CHAIN_LEN: u64 = 12;
const DCT_HEIGHT: u64 = 6;
const DCT_VALUE: u64 = 50_000_000; // 5000 dwarves at regtest cost

fn fixture() -> Fixture {
    let params = ConsensusParams::regtest();
    let key = SigningKey::random(&mut OsRng);
    let reward_key = key_id_from_pubkey(&key.verifying_key().to_sec1_bytes());

    let dct_tx = Transaction {
        version: PROTOCOL_VERSION,
        inputs: vec![TxIn {
            prevout: OutPoint {
                txid: Hash32([0xee; 32]),
                vout: 0,
            },
            script_sig: Script::new(),
            sequence: u32::MAX,
            witness: vec![],
        }],
        outputs: vec![TxOut {
            value: Amount::from_atoms(DCT_VALUE),
            script_pubkey: Script::dct(&params.dwarf_creation_script(), &reward_key),
        }],
        lock_time: 0,
    };
    let dct_txid = txid(&dct_tx).expect("dct txid");

    let mut headers = HashMap::new();
    let mut blocks = HashMap::new();
    let mut prev = Hash32::zero();
    let mut tip = Hash32::zero();
    for height in 0..CHAIN_LEN {
        let hash = hash_for(height);
        headers.insert(
            hash,
            HeaderInfo {
                hash,
                prev,
                height,
                time: 1_000 + height,
                bits: params.pow_limit_bits,
                nonce: 1,
            },
        );
        // Store the DCT's confirming block for the deep-drill path.
        let txs = if height == DCT_HEIGHT {
            vec![coinbase_for(height, &reward_key, &params), dct_tx.clone()]
        } else {
            vec![coinbase_for(height, &reward_key, &params)]
        };
        blocks.insert(
            hash,
            Block {
                header: BlockHeader {
                    version: PROTOCOL_VERSION,
                    prev,
                    merkle_root: Hash32::zero(),
                    time: 1_000 + height,
                    bits: params.pow_limit_bits,
                    nonce: 1,
                },
                txs,
            },
        );
        prev = hash;
        tip = hash;
    }

    let mut utxos = HashMap::new();
    utxos.insert(
        OutPoint {
            txid: dct_txid,
            vout: 0,
        },
        Coin {
            value: Amount::from_atoms(DCT_VALUE),
            script_pubkey: dct_tx.outputs[0].script_pubkey.clone(),
            height: DCT_HEIGHT,
        },
    );

    let chain = FakeChain {
        headers,
        blocks,
        utxos,
        tip,
    };
    let prev_info = chain.header(&tip).expect("tip header");
    let det_rand = deterministic_rand_string(&prev_info);

    Fixture {
        params,
        chain,
        key,
        reward_key,
        dct_tx,
        dct_txid,
        dct_height: DCT_HEIGHT,
        det_rand,
    }
}

fn coinbase_for(height: u64, reward: &KeyId, _params: &ConsensusParams) -> Transaction {
    Transaction {
        version: PROTOCOL_VERSION,
        inputs: vec![TxIn::coinbase(
            Script::new().push_int(height as i64).push_int(0),
        )],
        outputs: vec![TxOut {
            value: Amount::from_atoms(5),
            script_pubkey: Script::p2pkh(reward),
        }],
        lock_time: 0,
    }
}

impl Fixture {
    /// Find a dwarf index in `range` whose hash beats the easy regtest target.
    fn winning_nonce(&self, range: std::ops::Range<u32>) -> u32 {
        let target = bits_to_target(self.params.pow_limit_hive_bits).expect("target");
        let txid_hex = self.dct_txid.to_string();
        range
            .clone()
            .find(|i| hash_below_target(dwarf_hash(&self.det_rand, &txid_hex, *i).as_bytes(), &target))
            .expect("some dwarf in range must beat the easy target")
    }

    fn proof(&self, nonce: u32, claimed_height: u32) -> HiveProof {
        let sig = sign_compact(&self.key, &hive_message_hash(&self.det_rand)).expect("sign");
        HiveProof::new(nonce, claimed_height, false, &self.dct_txid, sig)
    }

    fn hive_block(&self, proof: &HiveProof) -> Block {
        let coinbase = Transaction {
            version: PROTOCOL_VERSION,
            inputs: vec![TxIn::coinbase(
                Script::new().push_int(CHAIN_LEN as i64).push_int(0),
            )],
            outputs: vec![
                TxOut {
                    value: Amount::zero(),
                    script_pubkey: proof.encode().expect("encode proof"),
                },
                TxOut {
                    value: self.params.hive_subsidy,
                    script_pubkey: Script::p2pkh(&self.reward_key),
                },
            ],
            lock_time: 0,
        };
        let mut block = Block {
            header: BlockHeader {
                version: PROTOCOL_VERSION,
                prev: self.chain.tip,
                merkle_root: Hash32::zero(),
                time: 1_000 + CHAIN_LEN,
                bits: self.params.pow_limit_hive_bits,
                nonce: self.params.hive_nonce_marker,
            },
            txs: vec![coinbase],
        };
        block.header.merkle_root = block_merkle_root(&block).expect("merkle");
        block
    }
}

fn reason(err: ConsensusError) -> &'static str {
    match err {
        ConsensusError::HiveProof(msg) => msg,
        other => panic!("expected hive proof rejection, got {other:?}"),
    }
}

#[test]
fn honest_proof_is_accepted() {
    let fx = fixture();
    let nonce = fx.winning_nonce(0..5000);
    let block = fx.hive_block(&fx.proof(nonce, fx.dct_height as u32));

    check_hive_proof(&block, &fx.chain, &fx.chain, &fx.chain, &fx.params).expect("proof accepted");
}

#[test]
fn deep_drill_resolves_spent_dct() {
    let fx = fixture();
    let nonce = fx.winning_nonce(0..5000);
    let block = fx.hive_block(&fx.proof(nonce, fx.dct_height as u32));

    // Drop the coin from the UTXO view: the validator must fall back to the
    // block database using the claimed height.
    let mut chain = fx.chain;
    chain.utxos.clear();
    check_hive_proof(&block, &chain, &chain, &chain, &fx.params).expect("deep drill accepted");
}

#[test]
fn nonce_beyond_dwarf_count_rejected() {
    let fx = fixture();
    let count = (DCT_VALUE / fx.params.dwarf_cost.atoms()) as u32;
    let nonce = fx.winning_nonce(count..count + 5000);
    let block = fx.hive_block(&fx.proof(nonce, fx.dct_height as u32));

    let err = check_hive_proof(&block, &fx.chain, &fx.chain, &fx.chain, &fx.params).unwrap_err();
    assert_eq!(
        reason(err),
        "DCT did not create enough dwarves for claimed nonce"
    );
}

#[test]
fn claimed_height_mismatch_rejected() {
    let fx = fixture();
    let nonce = fx.winning_nonce(0..5000);
    let block = fx.hive_block(&fx.proof(nonce, fx.dct_height as u32 + 1));

    let err = check_hive_proof(&block, &fx.chain, &fx.chain, &fx.chain, &fx.params).unwrap_err();
    assert_eq!(reason(err), "claimed DCT height conflicts with found height");
}

#[test]
fn immature_dct_rejected() {
    let mut fx = fixture();
    let nonce = fx.winning_nonce(0..5000);

    // Re-confirm the DCT right below the tip: depth < gestation.
    let late_height = CHAIN_LEN - 1;
    let out = OutPoint {
        txid: fx.dct_txid,
        vout: 0,
    };
    fx.chain.utxos.get_mut(&out).expect("coin").height = late_height;
    let block = fx.hive_block(&fx.proof(nonce, late_height as u32));

    let err = check_hive_proof(&block, &fx.chain, &fx.chain, &fx.chain, &fx.params).unwrap_err();
    assert_eq!(reason(err), "indicated DCT is immature");
}

#[test]
fn foreign_signature_rejected() {
    let fx = fixture();
    let nonce = fx.winning_nonce(0..5000);

    let stranger = SigningKey::random(&mut OsRng);
    let sig = sign_compact(&stranger, &hive_message_hash(&fx.det_rand)).expect("sign");
    let proof = HiveProof::new(nonce, fx.dct_height as u32, false, &fx.dct_txid, sig);
    let block = fx.hive_block(&proof);

    let err = check_hive_proof(&block, &fx.chain, &fx.chain, &fx.chain, &fx.params).unwrap_err();
    assert_eq!(reason(err), "signature mismatch");
}

#[test]
fn hive_block_with_dct_rejected() {
    let fx = fixture();
    let nonce = fx.winning_nonce(0..5000);
    let mut block = fx.hive_block(&fx.proof(nonce, fx.dct_height as u32));
    block.txs.push(fx.dct_tx.clone());

    let err = check_hive_proof(&block, &fx.chain, &fx.chain, &fx.chain, &fx.params).unwrap_err();
    assert_eq!(reason(err), "hive block contains DCTs");
}

#[test]
fn slow_start_blocks_hive_blocks() {
    let fx = fixture();
    let nonce = fx.winning_nonce(0..5000);
    let block = fx.hive_block(&fx.proof(nonce, fx.dct_height as u32));

    let strict = ConsensusParams {
        slow_start_blocks: 1_000,
        ..fx.params.clone()
    };
    let err = check_hive_proof(&block, &fx.chain, &fx.chain, &fx.chain, &strict).unwrap_err();
    assert_eq!(reason(err), "slow start has not finished");
}

#[test]
fn network_info_counts_the_confirmed_dct() {
    let fx = fixture();
    let info = network_hive_info(&fx.chain, &fx.chain, &fx.chain.tip, &fx.params)
        .expect("hive info");

    // The fixture's one DCT matured five blocks ago.
    assert_eq!(info.mature_dcts, 1);
    assert_eq!(
        info.mature_dwarves,
        DCT_VALUE / fx.params.dwarf_cost.atoms()
    );
    assert_eq!(info.immature_dcts, 0);
    assert!(info.potential_lifespan_rewards.atoms() > 0);
}

#[test]
fn consecutive_hive_cap_enforced() {
    let mut fx = fixture();
    let nonce = fx.winning_nonce(0..5000);

    // Mark the top `max_consecutive_hive_blocks` headers as Hive-mined.
    let marker = fx.params.hive_nonce_marker;
    let mut cursor = fx.chain.tip;
    for _ in 0..fx.params.max_consecutive_hive_blocks {
        let info = fx.chain.headers.get_mut(&cursor).expect("header");
        info.nonce = marker;
        cursor = info.prev;
    }
    let block = fx.hive_block(&fx.proof(nonce, fx.dct_height as u32));

    let err = check_hive_proof(&block, &fx.chain, &fx.chain, &fx.chain, &fx.params).unwrap_err();
    assert_eq!(reason(err), "too many hive blocks without a pow block");
}

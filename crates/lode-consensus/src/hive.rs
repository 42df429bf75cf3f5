// Consensus-critical. Changes require spec update + tests.
//! Hive proof construction and validation.
//!
//! A Hive block proves that one of the miner's on-chain dwarves hashed below
//! the dwarf-hash target for the current window. The proof is a fixed-layout
//! 144-byte script in `vout[0]` of the coinbase. Every full node must
//! reproduce this validation bit-exactly; rejections log a diagnostic and
//! return an error, never panic.

use crate::difficulty::{bits_to_target, hash_below_target};
use crate::error::ConsensusError;
use crate::retarget::{next_hive_work_required, HeaderInfo, HeaderSource};
use crate::subsidy::block_subsidy_hive;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use lode_core::script::opcodes::{OP_DWARF, OP_FALSE, OP_RETURN, OP_TRUE};
use lode_core::{
    hash32, key_id_from_pubkey, minotaur_hash_arbitrary, txid as tx_id, Amount, Block, Script,
    ConsensusParams, Hash32, KeyId, OutPoint, Transaction, TxId, DS_DETERMINISTIC_RAND,
    DS_HIVE_MESSAGE, HIVE_PROOF_SCRIPT_LEN,
};
use tracing::{debug, warn};

/// An unspent output, as resolved from the UTXO database.
#[derive(Clone, Debug)]
pub struct Coin {
    /// Output value.
    pub value: Amount,
    /// Output locking script.
    pub script_pubkey: Script,
    /// Height of the block that confirmed the output.
    pub height: u64,
}

/// Read-only access to the UTXO set.
pub trait UtxoView {
    /// Look up an unspent coin.
    fn coin(&self, out: &OutPoint) -> Option<Coin>;
}

/// Read-only access to stored blocks (the deep-drill path).
pub trait BlockReader {
    /// Read a full block by hash.
    fn block(&self, hash: &Hash32) -> Option<Block>;
}

/// The per-window string every dwarf hash is scoped to.
///
/// Deterministic in the chain history: fixed once the previous block is
/// fixed, unknowable before it, so dwarves cannot be pre-hashed.
pub fn deterministic_rand_string(prev: &HeaderInfo) -> String {
    let mut input = Vec::with_capacity(40);
    input.extend_from_slice(prev.hash.as_bytes());
    input.extend_from_slice(&prev.height.to_le_bytes());
    hash32(DS_DETERMINISTIC_RAND, &input).to_string()
}

/// Hash of the message a Hive miner signs to bind the proof to its window.
pub fn hive_message_hash(det_rand: &str) -> Hash32 {
    hash32(DS_HIVE_MESSAGE, det_rand.as_bytes())
}

/// Deterministic hash of one dwarf.
///
/// `h1 = Minotaur(det_rand || txid_hex || decimal(index))`, then
/// `h2 = Minotaur(hex(h1))`. The decimal index and hex re-hash are part of
/// the consensus contract.
pub fn dwarf_hash(det_rand: &str, txid_hex: &str, index: u32) -> Hash32 {
    let mut input = String::with_capacity(det_rand.len() + txid_hex.len() + 10);
    input.push_str(det_rand);
    input.push_str(txid_hex);
    input.push_str(&index.to_string());
    let h1 = minotaur_hash_arbitrary(input.as_bytes());
    minotaur_hash_arbitrary(h1.to_string().as_bytes())
}

/// Sign the Hive window message, producing a 65-byte compact recoverable
/// signature: `27 + recovery_id + 4` (compressed key), then `r || s`.
pub fn sign_compact(key: &SigningKey, message: &Hash32) -> Result<[u8; 65], ConsensusError> {
    let (sig, recid) = key
        .sign_prehash_recoverable(message.as_bytes())
        .map_err(|_| ConsensusError::HiveProof("signing failed"))?;
    let mut out = [0u8; 65];
    out[0] = 27 + recid.to_byte() + 4;
    out[1..].copy_from_slice(sig.to_bytes().as_slice());
    Ok(out)
}

/// Recover the signer's key-id from a compact signature over `message`.
pub fn recover_compact(message: &Hash32, compact: &[u8; 65]) -> Result<KeyId, ConsensusError> {
    let header = compact[0];
    if !(27..=34).contains(&header) {
        return Err(ConsensusError::HiveProof("bad compact signature header"));
    }
    let recid = RecoveryId::from_byte((header - 27) & 0x03)
        .ok_or(ConsensusError::HiveProof("bad recovery id"))?;
    let sig = Signature::from_slice(&compact[1..])
        .map_err(|_| ConsensusError::HiveProof("malformed signature"))?;
    let pubkey = VerifyingKey::recover_from_prehash(message.as_bytes(), &sig, recid)
        .map_err(|_| ConsensusError::HiveProof("pubkey recovery failed"))?;
    Ok(key_id_from_pubkey(&pubkey.to_sec1_bytes()))
}

/// Decoded Hive proof, as carried in coinbase `vout[0]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HiveProof {
    /// Index of the winning dwarf within its DCT.
    pub dwarf_nonce: u32,
    /// Claimed confirmation height of the DCT.
    pub dct_height: u32,
    /// Whether the DCT carried a community contribution.
    pub community_contrib: bool,
    /// ASCII-hex txid of the DCT, exactly as hashed by the dwarves.
    pub txid_hex: String,
    /// Compact recoverable signature over the window message.
    pub signature: [u8; 65],
}

impl HiveProof {
    /// Build a proof for the given DCT txid.
    pub fn new(
        dwarf_nonce: u32,
        dct_height: u32,
        community_contrib: bool,
        txid: &TxId,
        signature: [u8; 65],
    ) -> Self {
        Self {
            dwarf_nonce,
            dct_height,
            community_contrib,
            txid_hex: txid.to_string(),
            signature,
        }
    }

    /// Parse the carried txid back into its binary form.
    pub fn txid(&self) -> Result<TxId, ConsensusError> {
        self.txid_hex
            .parse::<Hash32>()
            .map_err(|_| ConsensusError::HiveProof("txid is not valid hex"))
    }

    /// Encode as the fixed 144-byte proof script.
    pub fn encode(&self) -> Result<Script, ConsensusError> {
        if self.txid_hex.len() != 64 {
            return Err(ConsensusError::HiveProof("txid hex must be 64 bytes"));
        }
        let mut b = Vec::with_capacity(HIVE_PROOF_SCRIPT_LEN);
        b.push(OP_RETURN);
        b.push(OP_DWARF);
        b.push(4);
        b.extend_from_slice(&self.dwarf_nonce.to_le_bytes());
        b.push(4);
        b.extend_from_slice(&self.dct_height.to_le_bytes());
        b.push(if self.community_contrib { OP_TRUE } else { OP_FALSE });
        b.push(64);
        b.extend_from_slice(self.txid_hex.as_bytes());
        b.push(65);
        b.extend_from_slice(&self.signature);
        debug_assert_eq!(b.len(), HIVE_PROOF_SCRIPT_LEN);
        Ok(Script::from_bytes(b))
    }

    /// Decode a proof script, bounds-checking every field.
    pub fn decode(script: &Script) -> Result<Self, ConsensusError> {
        let b = script.as_bytes();
        if b.len() < HIVE_PROOF_SCRIPT_LEN {
            return Err(ConsensusError::HiveProof("proof script too short"));
        }
        if b[0] != OP_RETURN || b[1] != OP_DWARF {
            return Err(ConsensusError::HiveProof(
                "proof script does not start OP_RETURN OP_DWARF",
            ));
        }
        if b[2] != 4 || b[7] != 4 || b[13] != 64 || b[78] != 65 {
            return Err(ConsensusError::HiveProof("bad push-length marker"));
        }
        let dwarf_nonce = u32::from_le_bytes([b[3], b[4], b[5], b[6]]);
        let dct_height = u32::from_le_bytes([b[8], b[9], b[10], b[11]]);
        let community_contrib = match b[12] {
            OP_TRUE => true,
            OP_FALSE => false,
            _ => return Err(ConsensusError::HiveProof("bad community contrib flag")),
        };
        let txid_hex = core::str::from_utf8(&b[14..78])
            .map_err(|_| ConsensusError::HiveProof("txid is not ASCII"))?
            .to_owned();
        let mut signature = [0u8; 65];
        signature.copy_from_slice(&b[79..144]);
        Ok(Self {
            dwarf_nonce,
            dct_height,
            community_contrib,
            txid_hex,
            signature,
        })
    }
}

/// Walk the chain from `from` down to `height` and scan that block for the
/// transaction. The claimed height turns an unbounded search into one read.
pub fn find_tx_by_hash_and_height(
    source: &impl HeaderSource,
    reader: &impl BlockReader,
    from: &HeaderInfo,
    txid: &TxId,
    height: u64,
) -> Option<(Transaction, u64)> {
    if height > from.height {
        return None;
    }
    let mut cursor = *from;
    while cursor.height > height {
        cursor = source.header(&cursor.prev)?;
    }
    let block = reader.block(&cursor.hash)?;
    for tx in &block.txs {
        if tx_id(tx).ok().as_ref() == Some(txid) {
            return Some((tx.clone(), cursor.height));
        }
    }
    None
}

/// Validate the Hive proof of `block`.
///
/// Every predicate from the consensus contract is checked in order; any
/// failure logs and rejects.
pub fn check_hive_proof(
    block: &Block,
    source: &impl HeaderSource,
    utxos: &impl UtxoView,
    reader: &impl BlockReader,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    let prev = source
        .header(&block.header.prev)
        .ok_or(ConsensusError::UnknownBlock("hive proof prev"))?;
    let block_height = prev.height + 1;
    debug!(height = block_height, "check_hive_proof");

    // No Hive blocks until the slow start has finished.
    if block_height < params.hive_enable_height() {
        warn!("check_hive_proof: hive block before end of slow start");
        return Err(ConsensusError::HiveProof("slow start has not finished"));
    }

    // Bounded run of Hive blocks since the last PoW block.
    let mut hive_run = 0u64;
    let mut cursor = prev;
    while cursor.is_hive_mined(params) {
        hive_run += 1;
        match source.header(&cursor.prev) {
            Some(p) => cursor = p,
            None => break,
        }
    }
    if hive_run >= params.max_consecutive_hive_blocks {
        warn!("check_hive_proof: too many Hive blocks without a PoW block");
        return Err(ConsensusError::HiveProof(
            "too many hive blocks without a pow block",
        ));
    }

    // A Hive block must not contain any DCT.
    let creation_script = params.dwarf_creation_script();
    if block.txs[1..].iter().any(|tx| tx.is_dct(&creation_script)) {
        warn!("check_hive_proof: hive block contains DCTs");
        return Err(ConsensusError::HiveProof("hive block contains DCTs"));
    }

    // Coinbase shape.
    let coinbase = block
        .txs
        .first()
        .ok_or(ConsensusError::HiveProof("empty block"))?;
    if !coinbase.is_coinbase() {
        warn!("check_hive_proof: first tx is not a coinbase");
        return Err(ConsensusError::HiveProof("first tx is not a coinbase"));
    }
    if coinbase.outputs.len() < 2 || coinbase.outputs.len() > 3 {
        warn!(
            vouts = coinbase.outputs.len(),
            "check_hive_proof: unexpected coinbase output count"
        );
        return Err(ConsensusError::HiveProof("coinbase needs 2 or 3 outputs"));
    }

    let proof = HiveProof::decode(&coinbase.outputs[0].script_pubkey)?;
    let proof_txid = proof.txid()?;

    // Dwarf hash must beat the current window target.
    let det_rand = deterministic_rand_string(&prev);
    let target_bits = next_hive_work_required(source, &block.header.prev, params)?;
    let target = bits_to_target(target_bits)?;
    let dh = dwarf_hash(&det_rand, &proof.txid_hex, proof.dwarf_nonce);
    if !hash_below_target(dh.as_bytes(), &target) {
        warn!(dwarf_hash = %dh, "check_hive_proof: dwarf does not meet hash target");
        return Err(ConsensusError::HiveProof("dwarf does not meet hash target"));
    }

    // Recovered signer must be the coinbase reward destination.
    let reward_key = coinbase.outputs[1]
        .script_pubkey
        .extract_destination()
        .ok_or(ConsensusError::HiveProof("cannot extract reward address"))?;
    let recovered = recover_compact(&hive_message_hash(&det_rand), &proof.signature)?;
    if recovered != reward_key {
        warn!(%recovered, expected = %reward_key, "check_hive_proof: signature mismatch");
        return Err(ConsensusError::HiveProof("signature mismatch"));
    }

    // Resolve the DCT output: UTXO set first, block database second.
    let out_creation = OutPoint {
        txid: proof_txid,
        vout: 0,
    };
    let mut dct_tx: Option<Transaction> = None;
    let (mut dct_value, dct_script, dct_found_height) =
        if let Some(coin) = utxos.coin(&out_creation) {
            (coin.value, coin.script_pubkey, coin.height)
        } else {
            debug!("check_hive_proof: using deep drill for DCT output");
            let (tx, found_height) = find_tx_by_hash_and_height(
                source,
                reader,
                &prev,
                &proof_txid,
                u64::from(proof.dct_height),
            )
            .ok_or_else(|| {
                warn!("check_hive_proof: could not locate indicated DCT");
                ConsensusError::HiveProof("could not locate indicated DCT")
            })?;
            let out = tx
                .outputs
                .first()
                .ok_or(ConsensusError::HiveProof("DCT has no outputs"))?
                .clone();
            dct_tx = Some(tx);
            (out.value, out.script_pubkey, found_height)
        };

    // Community contribution: vout[1] of the DCT must pay the community
    // destination the agreed share.
    if proof.community_contrib {
        let community_script = params.community_script();
        let donation = if let Some(tx) = &dct_tx {
            match tx.outputs.get(1) {
                Some(out) if out.script_pubkey == community_script => out.value,
                _ => {
                    warn!("check_hive_proof: community contrib indicated but not found");
                    return Err(ConsensusError::HiveProof(
                        "community contrib indicated but not found",
                    ));
                }
            }
        } else {
            let out_fund = OutPoint {
                txid: proof_txid,
                vout: 1,
            };
            match utxos.coin(&out_fund) {
                Some(coin) if coin.script_pubkey == community_script => coin.value,
                Some(_) => {
                    warn!("check_hive_proof: community contrib pays wrong destination");
                    return Err(ConsensusError::HiveProof(
                        "community contrib indicated but not found",
                    ));
                }
                None => {
                    debug!("check_hive_proof: using deep drill for community output");
                    let (tx, _) = find_tx_by_hash_and_height(
                        source,
                        reader,
                        &prev,
                        &proof_txid,
                        u64::from(proof.dct_height),
                    )
                    .ok_or(ConsensusError::HiveProof("could not locate indicated DCT"))?;
                    let value = match tx.outputs.get(1) {
                        Some(out) if out.script_pubkey == community_script => out.value,
                        _ => {
                            warn!("check_hive_proof: community contrib indicated but not found");
                            return Err(ConsensusError::HiveProof(
                                "community contrib indicated but not found",
                            ));
                        }
                    };
                    dct_tx = Some(tx);
                    value
                }
            }
        };

        let expected = Amount::from_atoms(
            (dct_value.atoms() + donation.atoms()) / params.community_contrib_factor,
        );
        if donation != expected {
            warn!(
                donation = donation.atoms(),
                expected = expected.atoms(),
                "check_hive_proof: DCT pays community fund incorrect amount"
            );
            return Err(ConsensusError::HiveProof(
                "DCT pays community fund incorrect amount",
            ));
        }
        dct_value = dct_value.checked_add(donation)?;
    }

    if dct_found_height != u64::from(proof.dct_height) {
        warn!(
            claimed = proof.dct_height,
            found = dct_found_height,
            "check_hive_proof: claimed DCT height conflicts with found height"
        );
        return Err(ConsensusError::HiveProof(
            "claimed DCT height conflicts with found height",
        ));
    }

    // Dwarf maturity window.
    let dct_depth = block_height - dct_found_height;
    if dct_depth < params.dwarf_gestation_blocks {
        warn!("check_hive_proof: indicated DCT is immature");
        return Err(ConsensusError::HiveProof("indicated DCT is immature"));
    }
    if dct_depth > params.total_dwarf_lifespan() {
        warn!("check_hive_proof: indicated DCT is too old");
        return Err(ConsensusError::HiveProof("indicated DCT is too old"));
    }

    // The DCT script must embed the same reward destination the coinbase pays.
    let reward_from_dct = dct_script
        .parse_dct(&creation_script)
        .ok_or_else(|| {
            warn!("check_hive_proof: indicated utxo is not a valid DCT script");
            ConsensusError::HiveProof("indicated utxo is not a valid DCT script")
        })?;
    if reward_from_dct != reward_key {
        warn!("check_hive_proof: DCT reward address does not match claimed reward address");
        return Err(ConsensusError::HiveProof(
            "DCT reward address does not match claimed reward address",
        ));
    }

    // Enough dwarves must have been minted to cover the claimed nonce.
    if dct_value < params.dwarf_cost {
        warn!("check_hive_proof: DCT fee is less than the cost of a single dwarf");
        return Err(ConsensusError::HiveProof(
            "DCT fee is less than the cost of a single dwarf",
        ));
    }
    let dwarf_count = dct_value.atoms() / params.dwarf_cost.atoms();
    if u64::from(proof.dwarf_nonce) >= dwarf_count {
        warn!(
            nonce = proof.dwarf_nonce,
            count = dwarf_count,
            "check_hive_proof: DCT did not create enough dwarves for claimed nonce"
        );
        return Err(ConsensusError::HiveProof(
            "DCT did not create enough dwarves for claimed nonce",
        ));
    }

    debug!(height = block_height, "check_hive_proof: pass");
    Ok(())
}

/// Network-wide dwarf population summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HiveNetworkInfo {
    /// Dwarves still gestating.
    pub immature_dwarves: u64,
    /// DCTs still gestating.
    pub immature_dcts: u64,
    /// Live, mature dwarves.
    pub mature_dwarves: u64,
    /// DCTs with mature dwarves.
    pub mature_dcts: u64,
    /// Hive rewards one dwarf lifespan could pay out.
    pub potential_lifespan_rewards: Amount,
}

/// Count live and gestating dwarves over one full dwarf lifespan of blocks.
///
/// Hive-mined blocks are skipped (they cannot contain DCTs). Donations that
/// fail the community-contribution equation do not mint dwarves.
pub fn network_hive_info(
    source: &impl HeaderSource,
    reader: &impl BlockReader,
    tip: &Hash32,
    params: &ConsensusParams,
) -> Result<HiveNetworkInfo, ConsensusError> {
    let creation_script = params.dwarf_creation_script();
    let community_script = params.community_script();

    let mut info = HiveNetworkInfo {
        potential_lifespan_rewards: Amount::from_atoms(
            params.dwarf_lifespan_blocks * block_subsidy_hive(params).atoms()
                / params.hive_block_spacing_target,
        ),
        ..Default::default()
    };

    let mut cursor = source
        .header(tip)
        .ok_or(ConsensusError::UnknownBlock("hive info tip"))?;

    for depth in 0..params.total_dwarf_lifespan() {
        if cursor.height < params.min_hive_check_block {
            break;
        }
        if !cursor.is_hive_mined(params) {
            let block = reader
                .block(&cursor.hash)
                .ok_or(ConsensusError::UnknownBlock("hive info block"))?;
            for tx in &block.txs {
                if !tx.is_dct(&creation_script) {
                    continue;
                }
                let mut paid = tx.outputs[0].value;
                if let Some(out) = tx.outputs.get(1) {
                    if out.script_pubkey == community_script {
                        let donation = out.value;
                        let expected = Amount::from_atoms(
                            (paid.atoms() + donation.atoms()) / params.community_contrib_factor,
                        );
                        if donation != expected {
                            continue;
                        }
                        paid = paid.checked_add(donation)?;
                    }
                }
                let dwarf_count = paid.atoms() / params.dwarf_cost.atoms();
                if depth < params.dwarf_gestation_blocks {
                    info.immature_dwarves += dwarf_count;
                    info.immature_dcts += 1;
                } else {
                    info.mature_dwarves += dwarf_count;
                    info.mature_dcts += 1;
                }
            }
        }
        match source.header(&cursor.prev) {
            Some(p) => cursor = p,
            None => break,
        }
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::elliptic_curve::rand_core::OsRng;

    #[test]
    fn proof_encoding_roundtrip() {
        let txid = Hash32([0xaa; 32]);
        let proof = HiveProof::new(7, 1234, true, &txid, [0x42; 65]);
        let script = proof.encode().expect("encode");
        assert_eq!(script.len(), HIVE_PROOF_SCRIPT_LEN);

        let decoded = HiveProof::decode(&script).expect("decode");
        assert_eq!(decoded, proof);
        assert_eq!(decoded.txid().expect("txid"), txid);
    }

    #[test]
    fn decode_rejects_malformed_scripts() {
        let txid = Hash32([0xaa; 32]);
        let good = HiveProof::new(0, 0, false, &txid, [0u8; 65])
            .encode()
            .expect("encode");

        // Too short.
        let short = Script::from_bytes(good.as_bytes()[..100].to_vec());
        assert!(HiveProof::decode(&short).is_err());

        // Wrong marker opcode.
        let mut bytes = good.as_bytes().to_vec();
        bytes[1] = 0x00;
        assert!(HiveProof::decode(&Script::from_bytes(bytes)).is_err());

        // Corrupt push-length byte.
        let mut bytes = good.as_bytes().to_vec();
        bytes[13] = 63;
        assert!(HiveProof::decode(&Script::from_bytes(bytes)).is_err());

        // Community flag must be OP_TRUE or OP_FALSE.
        let mut bytes = good.as_bytes().to_vec();
        bytes[12] = 0x02;
        assert!(HiveProof::decode(&Script::from_bytes(bytes)).is_err());
    }

    #[test]
    fn compact_signature_roundtrip() {
        let key = SigningKey::random(&mut OsRng);
        let expected = key_id_from_pubkey(&key.verifying_key().to_sec1_bytes());

        let message = hive_message_hash("0123");
        let sig = sign_compact(&key, &message).expect("sign");
        let recovered = recover_compact(&message, &sig).expect("recover");
        assert_eq!(recovered, expected);

        // A different message recovers a different key.
        let other = hive_message_hash("4567");
        assert_ne!(recover_compact(&other, &sig).ok(), Some(expected));
    }

    #[test]
    fn dwarf_hash_depends_on_all_inputs() {
        let base = dwarf_hash("rand", "aabb", 0);
        assert_eq!(dwarf_hash("rand", "aabb", 0), base);
        assert_ne!(dwarf_hash("rand", "aabb", 1), base);
        assert_ne!(dwarf_hash("rand", "aabc", 0), base);
        assert_ne!(dwarf_hash("rend", "aabb", 0), base);
    }
}

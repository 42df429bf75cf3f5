use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use borsh::{to_vec, BorshDeserialize, BorshSerialize};
use lode_consensus::{
    check_hive_proof, check_proof_of_work, tip_is_better, work_from_bits, BlockReader, Coin,
    HeaderInfo, HeaderSource, UtxoView,
};
use lode_core::{
    block_header_hash, block_merkle_root, pow_hash, txid, Block, ConsensusParams, Hash32,
    OutPoint, Script, MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT,
};
use lode_miner::{ChainView, TipInfo};
use num_bigint::BigUint;
use sled::transaction::{TransactionResult, Transactional};
use sled::Error as SledError;
use tracing::{debug, info, warn};

// Consensus-critical validation is delegated to lode-consensus; this module
// only handles storage, tip selection, and UTXO bookkeeping.

const TREE_BLOCKS: &str = "blocks";
const TREE_INDEX: &str = "index";
const TREE_META: &str = "meta";
const TREE_UTXOS: &str = "utxos";
const KEY_BEST: &[u8] = b"best";

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct IndexRecord {
    pub height: u64,
    pub bits: u32,
    pub time: u64,
    pub nonce: u32,
    pub prev: Hash32,
    pub cumulative_work: Vec<u8>, // BigUint BE bytes
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct UtxoRecord {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
    pub height: u64,
}

pub struct ChainDb {
    db: sled::Db,
    blocks: sled::Tree,
    index: sled::Tree,
    meta: sled::Tree,
    utxos: sled::Tree,
}

impl ChainDb {
    pub fn open(path: &Path) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| e.to_string())?;
        let blocks = db.open_tree(TREE_BLOCKS).map_err(|e| e.to_string())?;
        let index = db.open_tree(TREE_INDEX).map_err(|e| e.to_string())?;
        let meta = db.open_tree(TREE_META).map_err(|e| e.to_string())?;
        let utxos = db.open_tree(TREE_UTXOS).map_err(|e| e.to_string())?;
        Ok(Self {
            db,
            blocks,
            index,
            meta,
            utxos,
        })
    }

    pub fn flush(&self) -> Result<(), String> {
        self.db.flush().map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn get_block(&self, hash: &Hash32) -> Result<Option<Block>, String> {
        if let Some(bytes) = self.blocks.get(hash.as_bytes()).map_err(|e| e.to_string())? {
            let blk = Block::try_from_slice(&bytes).map_err(|e| e.to_string())?;
            Ok(Some(blk))
        } else {
            Ok(None)
        }
    }

    pub fn get_utxo(&self, op: &OutPoint) -> Result<Option<UtxoRecord>, String> {
        let key = outpoint_key(op);
        if let Some(bytes) = self.utxos.get(key).map_err(|e| e.to_string())? {
            let rec = UtxoRecord::try_from_slice(&bytes).map_err(|e| e.to_string())?;
            Ok(Some(rec))
        } else {
            Ok(None)
        }
    }

    pub fn put_utxo(&self, op: &OutPoint, rec: &UtxoRecord) -> Result<(), String> {
        let bytes = to_vec(rec).map_err(|e| e.to_string())?;
        self.utxos
            .insert(outpoint_key(op), bytes)
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn del_utxo(&self, op: &OutPoint) -> Result<(), String> {
        self.utxos
            .remove(outpoint_key(op))
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn all_utxos(&self) -> Result<Vec<(OutPoint, UtxoRecord)>, String> {
        let mut out = Vec::new();
        for item in self.utxos.iter() {
            let (k, v) = item.map_err(|e| e.to_string())?;
            if k.len() != 36 {
                continue;
            }
            let mut txid = [0u8; 32];
            txid.copy_from_slice(&k[0..32]);
            let mut vout_bytes = [0u8; 4];
            vout_bytes.copy_from_slice(&k[32..36]);
            let op = OutPoint {
                txid: Hash32(txid),
                vout: u32::from_le_bytes(vout_bytes),
            };
            let rec = UtxoRecord::try_from_slice(&v).map_err(|e| e.to_string())?;
            out.push((op, rec));
        }
        Ok(out)
    }

    pub fn upsert_block(
        &self,
        hash: Hash32,
        block: &Block,
        index: &IndexRecord,
        best: Option<Hash32>,
    ) -> Result<(), String> {
        let blk_bytes = to_vec(block).map_err(|e| e.to_string())?;
        let idx_bytes = to_vec(index).map_err(|e| e.to_string())?;
        let best_bytes = best.map(|h| h.as_bytes().to_vec());

        let res: TransactionResult<(), SledError> =
            (&self.blocks, &self.index, &self.meta).transaction(|(blocks, index, meta)| {
                blocks.insert(hash.as_bytes(), blk_bytes.clone())?;
                index.insert(hash.as_bytes(), idx_bytes.clone())?;
                if let Some(b) = &best_bytes {
                    meta.insert(KEY_BEST, b.clone())?;
                }
                Ok(())
            });

        res.map_err(|e| e.to_string())
    }

    pub fn all_indices(&self) -> Result<Vec<(Hash32, IndexRecord)>, String> {
        let mut out = Vec::new();
        for item in self.index.iter() {
            let (k, v) = item.map_err(|e| e.to_string())?;
            let rec = IndexRecord::try_from_slice(&v).map_err(|e| e.to_string())?;
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&k);
            out.push((Hash32(hash), rec));
        }
        Ok(out)
    }
}

#[derive(Clone)]
pub struct ChainEntry {
    pub info: HeaderInfo,
    pub cumulative_work: BigUint,
}

struct StoreState {
    db: ChainDb,
    entries: HashMap<Hash32, ChainEntry>,
    best: Hash32,
}

/// Sled-backed chain store with hive-aware validation on insert.
///
/// Reorganizations are out of scope: only blocks extending the best tip
/// update the UTXO table; heavier forks are stored but rejected as tips.
pub struct ChainStore {
    params: ConsensusParams,
    state: Mutex<StoreState>,
}

impl ChainStore {
    pub fn load_or_init(
        path: &Path,
        genesis: Block,
        params: ConsensusParams,
    ) -> Result<Self, String> {
        let db = ChainDb::open(path)?;
        let genesis_hash = block_hash(&genesis);

        if db.all_indices()?.is_empty() {
            let work = work_from_bits(genesis.header.bits).map_err(|e| e.to_string())?;
            let idx = IndexRecord {
                height: 0,
                bits: genesis.header.bits,
                time: genesis.header.time,
                nonce: genesis.header.nonce,
                prev: genesis.header.prev,
                cumulative_work: work.to_bytes_be(),
            };
            db.upsert_block(genesis_hash, &genesis, &idx, Some(genesis_hash))?;
            apply_block_utxos(&db, &genesis, 0)?;
        }

        let mut entries = HashMap::new();
        let mut best: Option<(Hash32, BigUint)> = None;
        for (hash, rec) in db.all_indices()? {
            let cum = BigUint::from_bytes_be(&rec.cumulative_work);
            if let Some((best_h, best_cum)) = best.as_ref() {
                if tip_is_better(&cum, &hash, best_cum, best_h) {
                    best = Some((hash, cum.clone()));
                }
            } else {
                best = Some((hash, cum.clone()));
            }
            entries.insert(
                hash,
                ChainEntry {
                    info: HeaderInfo {
                        hash,
                        prev: rec.prev,
                        height: rec.height,
                        time: rec.time,
                        bits: rec.bits,
                        nonce: rec.nonce,
                    },
                    cumulative_work: cum,
                },
            );
        }

        let best = best.ok_or_else(|| "no tip found after load".to_string())?.0;
        info!(tip = %best, blocks = entries.len(), "chain store loaded");

        Ok(Self {
            params,
            state: Mutex::new(StoreState { db, entries, best }),
        })
    }

    pub fn best_height(&self) -> u64 {
        self.tip().height
    }

    pub fn utxos(&self) -> Vec<(OutPoint, UtxoRecord)> {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        state.db.all_utxos().unwrap_or_default()
    }

    /// Validate and connect a block.
    ///
    /// Hive blocks validate their proof, PoW blocks their digest; both paths
    /// refuse unknown parents and over-long hive runs.
    pub fn insert_block(&self, block: Block) -> Result<(), String> {
        block.validate_sanity().map_err(|e| e.to_string())?;
        let hash = block_hash(&block);

        let prev = self
            .header(&block.header.prev)
            .ok_or_else(|| "previous block not found".to_string())?;
        let height = prev.height + 1;

        if block.header.merkle_root != block_merkle_root(&block).map_err(|e| e.to_string())? {
            return Err("merkle root mismatch".into());
        }

        // Validators walk the chain through &self; the state lock is only
        // taken once validation settles.
        if block.header.is_hive_mined(&self.params) {
            check_hive_proof(&block, self, self, self, &self.params).map_err(|e| e.to_string())?;
        } else if block.header.is_pop_mined(&self.params) {
            return Err("pop blocks are not produced here".into());
        } else {
            let digest = pow_hash(&block.header).map_err(|e| e.to_string())?;
            check_proof_of_work(&digest, block.header.bits, &self.params)
                .map_err(|e| e.to_string())?;
        }

        let work = work_from_bits(block.header.bits).map_err(|e| e.to_string())?;

        let mut state = self.state.lock().map_err(|_| "lock poisoned".to_string())?;
        let prev_entry = state
            .entries
            .get(&block.header.prev)
            .ok_or_else(|| "previous block not found".to_string())?;
        let cumulative_work = &prev_entry.cumulative_work + work;

        let extends_best = block.header.prev == state.best;
        let best_work = &state.entries[&state.best].cumulative_work;
        if !extends_best && tip_is_better(&cumulative_work, &hash, best_work, &state.best) {
            return Err("reorganization required but not supported".into());
        }

        let idx = IndexRecord {
            height,
            bits: block.header.bits,
            time: block.header.time,
            nonce: block.header.nonce,
            prev: block.header.prev,
            cumulative_work: cumulative_work.to_bytes_be(),
        };
        state
            .db
            .upsert_block(hash, &block, &idx, extends_best.then_some(hash))?;
        if extends_best {
            apply_block_utxos(&state.db, &block, height)?;
            state.db.flush()?;
            state.best = hash;
            debug!(height, hash = %hash, "tip advanced");
        } else {
            warn!(height, hash = %hash, "stored side-chain block");
        }
        state.entries.insert(
            hash,
            ChainEntry {
                info: HeaderInfo {
                    hash,
                    prev: block.header.prev,
                    height,
                    time: block.header.time,
                    bits: block.header.bits,
                    nonce: block.header.nonce,
                },
                cumulative_work,
            },
        );
        Ok(())
    }
}

impl HeaderSource for ChainStore {
    fn header(&self, hash: &Hash32) -> Option<HeaderInfo> {
        let state = self.state.lock().ok()?;
        state.entries.get(hash).map(|e| e.info)
    }
}

impl UtxoView for ChainStore {
    fn coin(&self, out: &OutPoint) -> Option<Coin> {
        let state = self.state.lock().ok()?;
        state.db.get_utxo(out).ok().flatten().map(|rec| Coin {
            value: lode_core::Amount::from_atoms(rec.value),
            script_pubkey: Script::from_bytes(rec.script_pubkey),
            height: rec.height,
        })
    }
}

impl BlockReader for ChainStore {
    fn block(&self, hash: &Hash32) -> Option<Block> {
        let state = self.state.lock().ok()?;
        state.db.get_block(hash).ok().flatten()
    }
}

impl ChainView for ChainStore {
    fn tip(&self) -> TipInfo {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                return TipInfo {
                    hash: Hash32::zero(),
                    height: 0,
                    time: 0,
                }
            }
        };
        let info = state.entries[&state.best].info;
        TipInfo {
            hash: info.hash,
            height: info.height,
            time: info.time,
        }
    }

    fn median_time_past(&self, hash: &Hash32) -> Option<u64> {
        let mut times = Vec::new();
        let mut cursor = *hash;
        for _ in 0..11 {
            let h = self.header(&cursor)?;
            times.push(h.time);
            if h.height == 0 {
                break;
            }
            cursor = h.prev;
        }
        times.reverse();
        lode_consensus::median_time_past(&times)
    }

    fn adjusted_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn test_block_validity(&self, block: &Block) -> Result<(), String> {
        block.validate_sanity().map_err(|e| e.to_string())?;
        if block.weight() > MAX_BLOCK_WEIGHT {
            return Err("block weight over ceiling".into());
        }
        let sigops: u64 = block
            .txs
            .iter()
            .flat_map(|tx| tx.outputs.iter().map(|o| o.script_pubkey.sigop_count()))
            .sum();
        if sigops * lode_core::WITNESS_SCALE_FACTOR > MAX_BLOCK_SIGOPS_COST {
            return Err("block sigops over ceiling".into());
        }
        if self.header(&block.header.prev).is_none() {
            return Err("previous block not found".into());
        }
        Ok(())
    }

    fn submit_block(&self, block: Block) -> Result<(), String> {
        self.insert_block(block)
    }
}

fn apply_block_utxos(db: &ChainDb, block: &Block, height: u64) -> Result<(), String> {
    for tx in &block.txs {
        let id = txid(tx).map_err(|e| e.to_string())?;
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                db.del_utxo(&input.prevout)?;
            }
        }
        for (vout, out) in tx.outputs.iter().enumerate() {
            db.put_utxo(
                &OutPoint {
                    txid: id,
                    vout: vout as u32,
                },
                &UtxoRecord {
                    value: out.value.atoms(),
                    script_pubkey: out.script_pubkey.as_bytes().to_vec(),
                    height,
                },
            )?;
        }
    }
    Ok(())
}

fn block_hash(block: &Block) -> Hash32 {
    block_header_hash(&block.header).unwrap_or(Hash32::zero())
}

fn outpoint_key(op: &OutPoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(op.txid.as_bytes());
    key.extend_from_slice(&op.vout.to_le_bytes());
    key
}

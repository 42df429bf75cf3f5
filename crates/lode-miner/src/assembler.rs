//! Block assembly: fee-maximizing package selection plus mode-specific
//! coinbase construction.
//!
//! Selection walks two priority sources in parallel: the mempool's
//! ancestor-feerate snapshot and a modified-entry set holding adjusted
//! aggregates for packages whose ancestors were already included. Failed
//! candidates are memoized so stale cached aggregates are never re-used.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::context::ChainView;
use crate::error::MinerError;
use crate::mempool::{ancestor_score_cmp, MempoolEntry, MempoolView};
use lode_consensus::{
    block_subsidy_hive, block_subsidy_pop_private, block_subsidy_pop_public, block_subsidy_pow,
    next_hive_work_required, next_work_required,
};
use lode_core::script::opcodes::{OP_RETURN, OP_TRUE};
use lode_core::{
    block_merkle_root, block_witness_merkle_root, witness_commitment, Amount, Block, BlockHeader,
    ConsensusParams, Script, Transaction, TxId, TxIn, TxOut, COINBASE_SIGOPS_RESERVE,
    COINBASE_WEIGHT_RESERVE, MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT, PROTOCOL_VERSION,
    WITNESS_COMMITMENT_TAG, WITNESS_SCALE_FACTOR,
};
use tracing::{debug, info, warn};

/// Give up after this many consecutive admission failures near a full block.
pub const MAX_CONSECUTIVE_FAILURES: u64 = 1000;

/// Which kind of block to assemble.
#[derive(Clone, Debug)]
pub enum BlockMode {
    /// Standard nonce-searched block.
    Pow,
    /// Hive block carrying the given proof script in coinbase `vout[0]`.
    Hive(Script),
    /// Pop block carrying the given proof script in coinbase `vout[0]`.
    Pop(Script),
}

impl BlockMode {
    fn suppresses_dcts(&self) -> bool {
        !matches!(self, BlockMode::Pow)
    }
}

/// Assembly policy knobs (clamped on construction).
#[derive(Clone, Debug)]
pub struct AssemblerOptions {
    /// Weight ceiling for the assembled block.
    pub block_max_weight: u64,
    /// Minimum package feerate, in atoms per 1000 virtual size units.
    pub block_min_fee_rate: u64,
    /// Log each included transaction's feerate.
    pub print_priority: bool,
    /// Header version override (honored on regtest only).
    pub block_version: Option<u16>,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            block_max_weight: MAX_BLOCK_WEIGHT - COINBASE_WEIGHT_RESERVE,
            block_min_fee_rate: 1000,
            print_priority: false,
            block_version: None,
        }
    }
}

impl AssemblerOptions {
    /// Clamp the weight ceiling to leave coinbase headroom.
    pub fn clamped(mut self) -> Self {
        self.block_max_weight = self
            .block_max_weight
            .clamp(COINBASE_WEIGHT_RESERVE, MAX_BLOCK_WEIGHT - COINBASE_WEIGHT_RESERVE);
        self
    }

    fn min_fee_for(&self, size: u64) -> Amount {
        Amount::from_atoms(self.block_min_fee_rate.saturating_mul(size) / 1000)
    }
}

/// An assembled candidate block plus its bookkeeping.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    /// The candidate block, coinbase first.
    pub block: Block,
    /// Per-transaction fees; the coinbase slot holds `-total_fees`.
    pub fees: Vec<i64>,
    /// Per-transaction sigops cost.
    pub sigops_cost: Vec<i64>,
    /// The coinbase witness commitment script, when witness is enabled.
    pub coinbase_commitment: Option<Script>,
    /// Sum of included transaction fees.
    pub total_fees: Amount,
    /// Final block weight including the coinbase reservation.
    pub block_weight: u64,
    /// Included transactions, excluding the coinbase.
    pub tx_count: u64,
}

/// Key ordering the modified-entry set best-feerate-first.
#[derive(Clone, PartialEq, Eq)]
struct ModKey {
    fees: Amount,
    size: u64,
    txid: TxId,
}

impl Ord for ModKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher feerate sorts earlier; ties break on txid.
        match ancestor_score_cmp(other.fees, other.size, self.fees, self.size) {
            Ordering::Equal => self.txid.as_bytes().cmp(other.txid.as_bytes()),
            ord => ord,
        }
    }
}

impl PartialOrd for ModKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Adjusted aggregates for a package whose ancestors are already in-block.
struct ModEntry {
    entry: Arc<MempoolEntry>,
    size_with_ancestors: u64,
    fees_with_ancestors: Amount,
    sigops_with_ancestors: u64,
}

impl ModEntry {
    fn key(&self) -> ModKey {
        ModKey {
            fees: self.fees_with_ancestors,
            size: self.size_with_ancestors,
            txid: self.entry.txid,
        }
    }
}

struct Selection {
    entries: Vec<Arc<MempoolEntry>>,
    in_block: HashSet<TxId>,
    block_weight: u64,
    block_sigops: u64,
    fees: Amount,
}

/// Assembles candidate blocks from the mempool.
pub struct BlockAssembler<'a, C: ChainView, M: MempoolView> {
    chain: &'a C,
    mempool: &'a M,
    params: &'a ConsensusParams,
    options: AssemblerOptions,
}

impl<'a, C: ChainView, M: MempoolView> BlockAssembler<'a, C, M> {
    /// Create an assembler with clamped options.
    pub fn new(
        chain: &'a C,
        mempool: &'a M,
        params: &'a ConsensusParams,
        options: AssemblerOptions,
    ) -> Self {
        Self {
            chain,
            mempool,
            params,
            options: options.clamped(),
        }
    }

    /// Assemble a candidate block paying `script_pub_key`.
    ///
    /// A validity failure is a hard error in PoW mode and a soft `None`
    /// under Hive/Pop, where the caller's cycle simply retries later.
    pub fn assemble(
        &self,
        script_pub_key: &Script,
        mode: &BlockMode,
    ) -> Result<Option<BlockTemplate>, MinerError> {
        let tip = self.chain.tip();
        let height = tip.height + 1;
        let mtp = self.chain.median_time_past(&tip.hash);
        let adjusted = self.chain.adjusted_time();
        let lock_time_cutoff = mtp.unwrap_or(adjusted);
        let include_witness = self.chain.witness_enabled();
        let include_dcts = !mode.suppresses_dcts();

        let mut sel = Selection {
            entries: Vec::new(),
            in_block: HashSet::new(),
            block_weight: COINBASE_WEIGHT_RESERVE,
            block_sigops: COINBASE_SIGOPS_RESERVE,
            fees: Amount::zero(),
        };
        let (packages, descendants) = self.add_package_txs(
            &mut sel,
            height,
            lock_time_cutoff,
            include_witness,
            include_dcts,
        );

        // Mode-specific coinbase.
        let script_sig = Script::new().push_int(height as i64).push_int(0);
        let coinbase = match mode {
            BlockMode::Pow => Transaction {
                version: PROTOCOL_VERSION,
                inputs: vec![TxIn::coinbase(script_sig)],
                outputs: vec![TxOut {
                    value: sel
                        .fees
                        .checked_add(block_subsidy_pow(height, self.params))?,
                    script_pubkey: script_pub_key.clone(),
                }],
                lock_time: 0,
            },
            BlockMode::Hive(proof) => Transaction {
                version: PROTOCOL_VERSION,
                inputs: vec![TxIn::coinbase(script_sig)],
                outputs: vec![
                    TxOut {
                        value: Amount::zero(),
                        script_pubkey: proof.clone(),
                    },
                    TxOut {
                        value: sel.fees.checked_add(block_subsidy_hive(self.params))?,
                        script_pubkey: script_pub_key.clone(),
                    },
                ],
                lock_time: 0,
            },
            BlockMode::Pop(proof) => {
                // Byte 36 of the proof script distinguishes private games.
                let is_private = proof.as_bytes().get(36).copied() == Some(OP_TRUE);
                let subsidy = if is_private {
                    block_subsidy_pop_private(self.params)
                } else {
                    block_subsidy_pop_public(self.params)
                };
                Transaction {
                    version: PROTOCOL_VERSION,
                    inputs: vec![TxIn::coinbase(script_sig)],
                    outputs: vec![
                        TxOut {
                            value: Amount::zero(),
                            script_pubkey: proof.clone(),
                        },
                        TxOut {
                            value: sel.fees.checked_add(subsidy)?,
                            script_pubkey: script_pub_key.clone(),
                        },
                    ],
                    lock_time: 0,
                }
            }
        };

        let mut txs = Vec::with_capacity(sel.entries.len() + 1);
        txs.push(coinbase);
        txs.extend(sel.entries.iter().map(|e| (*e.tx).clone()));

        let mut version = PROTOCOL_VERSION;
        if self.params.mine_blocks_on_demand {
            if let Some(v) = self.options.block_version {
                version = v;
            }
        }

        let bits = match mode {
            BlockMode::Pow => next_work_required(self.chain, &tip.hash, adjusted, self.params)?,
            BlockMode::Hive(_) => next_hive_work_required(self.chain, &tip.hash, self.params)?,
            BlockMode::Pop(_) => self.params.pow_limit_bits,
        };
        let nonce = match mode {
            BlockMode::Pow => 0,
            BlockMode::Hive(_) => self.params.hive_nonce_marker,
            BlockMode::Pop(_) => self.params.pop_nonce_marker,
        };

        let mut block = Block {
            header: BlockHeader {
                version,
                prev: tip.hash,
                merkle_root: lode_core::Hash32::zero(),
                time: adjusted.max(mtp.map(|m| m + 1).unwrap_or(0)),
                bits,
                nonce,
            },
            txs,
        };

        // Witness commitment rides as an extra coinbase output.
        let coinbase_commitment = if include_witness {
            let witness_root = block_witness_merkle_root(&block)?;
            let commitment = witness_commitment(&witness_root);
            let mut payload = Vec::with_capacity(36);
            payload.extend_from_slice(&WITNESS_COMMITMENT_TAG);
            payload.extend_from_slice(commitment.as_bytes());
            let script = Script::new().push_opcode(OP_RETURN).push_data(&payload)?;
            block.txs[0].outputs.push(TxOut {
                value: Amount::zero(),
                script_pubkey: script.clone(),
            });
            Some(script)
        } else {
            None
        };

        block.header.merkle_root = block_merkle_root(&block)?;

        // Per-transaction bookkeeping, coinbase slot first.
        let mut fees = Vec::with_capacity(block.txs.len());
        let mut sigops_cost = Vec::with_capacity(block.txs.len());
        fees.push(-(sel.fees.atoms() as i64));
        sigops_cost.push(
            (WITNESS_SCALE_FACTOR
                * block.txs[0]
                    .inputs
                    .iter()
                    .map(|i| i.script_sig.sigop_count())
                    .chain(block.txs[0].outputs.iter().map(|o| o.script_pubkey.sigop_count()))
                    .sum::<u64>()) as i64,
        );
        for entry in &sel.entries {
            fees.push(entry.fee.atoms() as i64);
            sigops_cost.push(entry.sigops_cost as i64);
        }

        info!(
            weight = sel.block_weight,
            txs = sel.entries.len(),
            fees = sel.fees.atoms(),
            sigops = sel.block_sigops,
            packages,
            descendants,
            "assembled block candidate"
        );

        if let Err(msg) = self.chain.test_block_validity(&block) {
            return match mode {
                BlockMode::Pow => Err(MinerError::InvalidTemplate(msg)),
                _ => {
                    warn!(reason = %msg, "candidate failed validity; dropping template");
                    Ok(None)
                }
            };
        }

        Ok(Some(BlockTemplate {
            tx_count: sel.entries.len() as u64,
            total_fees: sel.fees,
            block_weight: sel.block_weight,
            block,
            fees,
            sigops_cost,
            coinbase_commitment,
        }))
    }

    fn test_package(&self, sel: &Selection, package_size: u64, package_sigops: u64) -> bool {
        if sel.block_weight + WITNESS_SCALE_FACTOR * package_size >= self.options.block_max_weight {
            return false;
        }
        if sel.block_sigops + package_sigops >= MAX_BLOCK_SIGOPS_COST {
            return false;
        }
        true
    }

    fn test_package_transactions(
        &self,
        package: &[Arc<MempoolEntry>],
        height: u64,
        lock_time_cutoff: u64,
        include_witness: bool,
        include_dcts: bool,
    ) -> bool {
        for entry in package {
            if !entry.tx.is_final(height, lock_time_cutoff) {
                return false;
            }
            if !include_witness && entry.tx.has_witness() {
                return false;
            }
            if !include_dcts && entry.is_dct {
                return false;
            }
        }
        true
    }

    fn add_to_block(&self, sel: &mut Selection, entry: &Arc<MempoolEntry>) {
        sel.block_weight += entry.weight;
        sel.block_sigops += entry.sigops_cost;
        // Selection scores on modified fees; the block pays out raw fees.
        sel.fees = sel.fees.checked_add(entry.fee).unwrap_or(sel.fees);
        sel.in_block.insert(entry.txid);
        sel.entries.push(entry.clone());

        if self.options.print_priority {
            debug!(
                fee = entry.modified_fee.atoms(),
                size = entry.size,
                txid = %entry.txid,
                "added to block"
            );
        }
    }

    /// The two-source package selection loop.
    fn add_package_txs(
        &self,
        sel: &mut Selection,
        height: u64,
        lock_time_cutoff: u64,
        include_witness: bool,
        include_dcts: bool,
    ) -> (u64, u64) {
        let snapshot = self.mempool.entries_by_ancestor_score();
        let mut mi = snapshot.into_iter().peekable();

        let mut mod_order: BTreeSet<ModKey> = BTreeSet::new();
        let mut mod_map: HashMap<TxId, ModEntry> = HashMap::new();
        let mut failed: HashSet<TxId> = HashSet::new();

        let mut consecutive_failures = 0u64;
        let mut packages_selected = 0u64;
        let mut descendants_updated = 0u64;

        loop {
            // Skip snapshot entries that are in-block, stale (modified), or
            // known failures.
            if let Some(front) = mi.peek() {
                if sel.in_block.contains(&front.txid)
                    || mod_map.contains_key(&front.txid)
                    || failed.contains(&front.txid)
                {
                    mi.next();
                    continue;
                }
            }

            // Pick the better of the two sources.
            let best_mod = mod_order.iter().next().cloned();
            let (entry, pkg_size, pkg_fees, pkg_sigops, using_modified) =
                match (mi.peek().cloned(), best_mod) {
                    (None, None) => break,
                    (None, Some(key)) => {
                        let m = &mod_map[&key.txid];
                        (
                            m.entry.clone(),
                            m.size_with_ancestors,
                            m.fees_with_ancestors,
                            m.sigops_with_ancestors,
                            true,
                        )
                    }
                    (Some(front), None) => {
                        mi.next();
                        (
                            front.clone(),
                            front.size_with_ancestors,
                            front.fees_with_ancestors,
                            front.sigops_with_ancestors,
                            false,
                        )
                    }
                    (Some(front), Some(key)) => {
                        let m = &mod_map[&key.txid];
                        if ancestor_score_cmp(
                            m.fees_with_ancestors,
                            m.size_with_ancestors,
                            front.fees_with_ancestors,
                            front.size_with_ancestors,
                        ) == Ordering::Greater
                        {
                            (
                                m.entry.clone(),
                                m.size_with_ancestors,
                                m.fees_with_ancestors,
                                m.sigops_with_ancestors,
                                true,
                            )
                        } else {
                            mi.next();
                            (
                                front.clone(),
                                front.size_with_ancestors,
                                front.fees_with_ancestors,
                                front.sigops_with_ancestors,
                                false,
                            )
                        }
                    }
                };

            debug_assert!(!sel.in_block.contains(&entry.txid));

            // Everything after this candidate scores lower; a failed floor
            // check ends selection outright.
            if pkg_fees < self.options.min_fee_for(pkg_size) {
                return (packages_selected, descendants_updated);
            }

            if !self.test_package(sel, pkg_size, pkg_sigops) {
                if using_modified {
                    let m = mod_map.remove(&entry.txid).map(|m| m.key());
                    if let Some(key) = m {
                        mod_order.remove(&key);
                    }
                    failed.insert(entry.txid);
                }
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES
                    && sel.block_weight > self.options.block_max_weight - COINBASE_WEIGHT_RESERVE
                {
                    // Close to full and not making progress.
                    break;
                }
                continue;
            }

            // Candidate package: not-yet-included ancestors plus the entry.
            let mut package: Vec<Arc<MempoolEntry>> = self
                .mempool
                .ancestors_of(&entry.txid)
                .into_iter()
                .filter(|a| !sel.in_block.contains(&a.txid))
                .collect();
            package.push(entry.clone());

            if !self.test_package_transactions(
                &package,
                height,
                lock_time_cutoff,
                include_witness,
                include_dcts,
            ) {
                if using_modified {
                    let m = mod_map.remove(&entry.txid).map(|m| m.key());
                    if let Some(key) = m {
                        mod_order.remove(&key);
                    }
                    failed.insert(entry.txid);
                }
                continue;
            }

            consecutive_failures = 0;

            // Parents before children: sort by ancestor count.
            package.sort_by(|a, b| {
                a.ancestor_count
                    .cmp(&b.ancestor_count)
                    .then_with(|| a.txid.as_bytes().cmp(b.txid.as_bytes()))
            });

            let added: HashSet<TxId> = package.iter().map(|e| e.txid).collect();
            for e in &package {
                self.add_to_block(sel, e);
                if let Some(m) = mod_map.remove(&e.txid) {
                    mod_order.remove(&m.key());
                }
            }
            packages_selected += 1;

            // Reduce descendants' cached aggregates by what just landed.
            for e in &package {
                for desc in self.mempool.descendants_of(&e.txid) {
                    if added.contains(&desc.txid) {
                        continue;
                    }
                    descendants_updated += 1;
                    let m = mod_map.entry(desc.txid).or_insert_with(|| ModEntry {
                        size_with_ancestors: desc.size_with_ancestors,
                        fees_with_ancestors: desc.fees_with_ancestors,
                        sigops_with_ancestors: desc.sigops_with_ancestors,
                        entry: desc.clone(),
                    });
                    mod_order.remove(&m.key());
                    m.size_with_ancestors -= e.size;
                    m.fees_with_ancestors = m
                        .fees_with_ancestors
                        .checked_sub(e.modified_fee)
                        .unwrap_or(Amount::zero());
                    m.sigops_with_ancestors -= e.sigops_cost;
                    mod_order.insert(m.key());
                }
            }
        }

        (packages_selected, descendants_updated)
    }
}

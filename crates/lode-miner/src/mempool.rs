//! The mempool query surface consumed by block assembly.
//!
//! The pool itself lives elsewhere; the assembler only needs entries with
//! cached ancestor aggregates, ordered by ancestor feerate, plus ancestor
//! and descendant closures. [`StaticMempool`] is a snapshot implementation
//! for the devnet binary and tests.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use lode_core::{txid, Amount, ConsensusParams, Transaction, TxId, WITNESS_SCALE_FACTOR};

/// One mempool entry with cached package aggregates.
///
/// Sizes are virtual sizes (weight / scale factor); ancestor aggregates
/// include the entry itself.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    /// The transaction.
    pub tx: Arc<Transaction>,
    /// Cached txid.
    pub txid: TxId,
    /// Raw fee paid.
    pub fee: Amount,
    /// Fee after prioritisation deltas; selection uses this.
    pub modified_fee: Amount,
    /// Virtual size.
    pub size: u64,
    /// Block weight.
    pub weight: u64,
    /// Signature-operation cost.
    pub sigops_cost: u64,
    /// Number of in-pool ancestors, including self.
    pub ancestor_count: u64,
    /// Virtual size of self plus all in-pool ancestors.
    pub size_with_ancestors: u64,
    /// Modified fees of self plus all in-pool ancestors.
    pub fees_with_ancestors: Amount,
    /// Sigops cost of self plus all in-pool ancestors.
    pub sigops_with_ancestors: u64,
    /// Whether the transaction is a dwarf-creation transaction.
    pub is_dct: bool,
}

/// Compare two packages by feerate (`fee_a/size_a` vs `fee_b/size_b`)
/// without rationals: cross-multiplied in u128.
pub fn ancestor_score_cmp(fee_a: Amount, size_a: u64, fee_b: Amount, size_b: u64) -> Ordering {
    let lhs = fee_a.atoms() as u128 * size_b.max(1) as u128;
    let rhs = fee_b.atoms() as u128 * size_a.max(1) as u128;
    lhs.cmp(&rhs)
}

/// Read-only mempool surface.
pub trait MempoolView: Send + Sync {
    /// Counter bumped on every pool mutation; miners use it to detect drift.
    fn transactions_updated(&self) -> u64;

    /// Snapshot of all entries, best ancestor feerate first.
    fn entries_by_ancestor_score(&self) -> Vec<Arc<MempoolEntry>>;

    /// In-pool ancestors of a transaction (excluding itself).
    fn ancestors_of(&self, txid: &TxId) -> Vec<Arc<MempoolEntry>>;

    /// In-pool descendants of a transaction (excluding itself).
    fn descendants_of(&self, txid: &TxId) -> Vec<Arc<MempoolEntry>>;
}

/// A snapshot mempool with explicit parent links.
///
/// Aggregates are recomputed on insertion; good enough for the devnet
/// binary and for driving the assembler in tests.
#[derive(Default)]
pub struct StaticMempool {
    entries: HashMap<TxId, Arc<MempoolEntry>>,
    parents: HashMap<TxId, Vec<TxId>>,
    updated: AtomicU64,
}

impl StaticMempool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction with the given fee and explicit in-pool parents.
    ///
    /// Parents must be inserted first; aggregates accumulate transitively.
    pub fn insert(
        &mut self,
        tx: Transaction,
        fee: Amount,
        sigops_cost: u64,
        parent_ids: &[TxId],
        params: &ConsensusParams,
    ) -> TxId {
        let id = txid(&tx).expect("encodable tx");
        let weight = tx.weight();
        let size = weight.div_ceil(WITNESS_SCALE_FACTOR);
        let is_dct = tx.is_dct(&params.dwarf_creation_script());

        let ancestors = self.closure(parent_ids, |m, id| m.parents.get(id));
        let mut entry = MempoolEntry {
            tx: Arc::new(tx),
            txid: id,
            fee,
            modified_fee: fee,
            size,
            weight,
            sigops_cost,
            ancestor_count: 1,
            size_with_ancestors: size,
            fees_with_ancestors: fee,
            sigops_with_ancestors: sigops_cost,
            is_dct,
        };
        for anc in &ancestors {
            let a = &self.entries[anc];
            entry.ancestor_count += 1;
            entry.size_with_ancestors += a.size;
            entry.fees_with_ancestors = entry
                .fees_with_ancestors
                .checked_add(a.modified_fee)
                .expect("fee overflow");
            entry.sigops_with_ancestors += a.sigops_cost;
        }

        self.parents.insert(id, parent_ids.to_vec());
        self.entries.insert(id, Arc::new(entry));
        self.updated.fetch_add(1, AtomicOrdering::SeqCst);
        id
    }

    /// Bump the mutation counter without changing contents.
    pub fn touch(&self) {
        self.updated.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn closure<'a, F>(&'a self, seeds: &[TxId], edges: F) -> Vec<TxId>
    where
        F: Fn(&'a Self, &TxId) -> Option<&'a Vec<TxId>>,
    {
        let mut seen: Vec<TxId> = Vec::new();
        let mut queue: Vec<TxId> = seeds.to_vec();
        while let Some(id) = queue.pop() {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            if let Some(next) = edges(self, &id) {
                queue.extend(next.iter().copied());
            }
        }
        seen
    }

    fn children_of(&self, id: &TxId) -> Vec<TxId> {
        self.parents
            .iter()
            .filter(|(_, parents)| parents.contains(id))
            .map(|(child, _)| *child)
            .collect()
    }
}

impl MempoolView for StaticMempool {
    fn transactions_updated(&self) -> u64 {
        self.updated.load(AtomicOrdering::SeqCst)
    }

    fn entries_by_ancestor_score(&self) -> Vec<Arc<MempoolEntry>> {
        let mut v: Vec<_> = self.entries.values().cloned().collect();
        v.sort_by(|a, b| {
            let score = ancestor_score_cmp(
                b.fees_with_ancestors,
                b.size_with_ancestors,
                a.fees_with_ancestors,
                a.size_with_ancestors,
            );
            if score == Ordering::Equal {
                a.txid.as_bytes().cmp(b.txid.as_bytes())
            } else {
                score
            }
        });
        v
    }

    fn ancestors_of(&self, txid: &TxId) -> Vec<Arc<MempoolEntry>> {
        let seeds = self.parents.get(txid).cloned().unwrap_or_default();
        self.closure(&seeds, |m, id| m.parents.get(id))
            .into_iter()
            .filter_map(|id| self.entries.get(&id).cloned())
            .collect()
    }

    fn descendants_of(&self, txid: &TxId) -> Vec<Arc<MempoolEntry>> {
        let mut seen: Vec<TxId> = Vec::new();
        let mut queue = self.children_of(txid);
        while let Some(id) = queue.pop() {
            if seen.contains(&id) {
                continue;
            }
            queue.extend(self.children_of(&id));
            seen.push(id);
        }
        seen.into_iter()
            .filter_map(|id| self.entries.get(&id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::{OutPoint, Script, TxIn, TxOut, Hash32, PROTOCOL_VERSION};

    fn tx_spending(prev: Hash32, outputs: usize) -> Transaction {
        Transaction {
            version: PROTOCOL_VERSION,
            inputs: vec![TxIn {
                prevout: OutPoint { txid: prev, vout: 0 },
                script_sig: Script::new(),
                sequence: u32::MAX,
                witness: vec![],
            }],
            outputs: (0..outputs)
                .map(|i| TxOut {
                    value: Amount::from_atoms(1000 + i as u64),
                    script_pubkey: Script::new(),
                })
                .collect(),
            lock_time: 0,
        }
    }

    #[test]
    fn score_ordering_is_feerate_ordering() {
        // 10/100 > 5/100 > 2/100; cross-multiplication agrees.
        assert_eq!(
            ancestor_score_cmp(Amount::from_atoms(10), 100, Amount::from_atoms(5), 100),
            Ordering::Greater
        );
        // 10/200 == 5/100
        assert_eq!(
            ancestor_score_cmp(Amount::from_atoms(10), 200, Amount::from_atoms(5), 100),
            Ordering::Equal
        );
    }

    #[test]
    fn aggregates_accumulate_over_parents() {
        let params = ConsensusParams::regtest();
        let mut pool = StaticMempool::new();

        let parent = tx_spending(Hash32([1; 32]), 1);
        let pid = pool.insert(parent, Amount::from_atoms(500), 4, &[], &params);

        let child = tx_spending(Hash32([2; 32]), 1);
        let cid = pool.insert(child, Amount::from_atoms(700), 4, &[pid], &params);

        let centry = &pool.entries[&cid];
        assert_eq!(centry.ancestor_count, 2);
        assert_eq!(centry.fees_with_ancestors, Amount::from_atoms(1200));
        assert_eq!(centry.sigops_with_ancestors, 8);

        assert_eq!(pool.ancestors_of(&cid).len(), 1);
        assert_eq!(pool.descendants_of(&pid).len(), 1);
        assert_eq!(pool.transactions_updated(), 2);
    }
}

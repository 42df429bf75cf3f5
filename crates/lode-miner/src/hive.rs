//! Hive mining: the dwarf master.
//!
//! A supervisor thread watches the tip; when it advances, every mature
//! wallet dwarf is hashed against the window target across a pool of worker
//! threads with cooperative early abort. A winning dwarf yields a signed
//! proof script, a Hive-mode block from the assembler, and a submission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::assembler::{BlockAssembler, BlockMode};
use crate::context::{ChainView, DctInfo, DwarfStatus, NetworkView, WalletView};
use crate::mempool::MempoolView;
use crate::pow::MinerContext;
use lode_consensus::{
    bits_to_target, deterministic_rand_string, dwarf_hash, hash_below_target, hive_message_hash,
    next_hive_work_required, sign_compact, HiveProof,
};
use lode_core::{KeyId, OutPoint, Script, TxId};
use num_bigint::BigUint;
use tracing::{debug, info, warn};

/// Flags checked by workers every this many dwarves; the atomic load is
/// cheap but not free.
const ABORT_POLL_INTERVAL: u64 = 1000;

/// How often the abort watcher polls the tip.
const ABORT_WATCH_SLEEP: Duration = Duration::from_millis(1);

/// Hive miner knobs, fed from the CLI surface.
#[derive(Clone, Debug)]
pub struct HiveOptions {
    /// Supervisor poll interval in milliseconds.
    pub check_delay_ms: u64,
    /// Worker thread count (`-2`: cores − 1, `0`: one, out of range: cores).
    pub check_threads: i64,
    /// Run the early-abort watcher thread.
    pub early_out: bool,
}

impl Default for HiveOptions {
    fn default() -> Self {
        Self {
            check_delay_ms: 1000,
            check_threads: -2,
            early_out: true,
        }
    }
}

/// A contiguous run of dwarves from one DCT; the unit of worker scheduling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DwarfRange {
    /// DCT transaction id.
    pub txid: TxId,
    /// Reward destination of the DCT.
    pub reward_key: KeyId,
    /// Community-contribution flag of the DCT.
    pub community_contrib: bool,
    /// First dwarf index in the range.
    pub offset: u64,
    /// Number of dwarves in the range.
    pub count: u64,
}

/// The winning range and dwarf, written once under the solution mutex.
#[derive(Clone, Debug)]
pub struct HiveSolution {
    /// Range the winning dwarf belongs to.
    pub range: DwarfRange,
    /// Winning dwarf index (absolute within the DCT).
    pub dwarf_index: u64,
}

/// Resolve the worker thread count from its CLI encoding.
pub fn resolve_thread_count(requested: i64) -> usize {
    let cores = num_cpus::get();
    if requested == -2 {
        cores.saturating_sub(1).max(1)
    } else if requested == 0 {
        1
    } else if requested < 0 || requested as usize > cores {
        cores
    } else {
        requested as usize
    }
}

/// Greedily pack mature DCTs into bins of roughly `per_bin` dwarves.
///
/// A DCT that does not fit the current bin is split: the prefix fills the
/// bin and the remainder starts the next one.
pub fn bin_dwarves(dcts: &[DctInfo], per_bin: u64) -> Vec<Vec<DwarfRange>> {
    let mut bins = Vec::new();
    let mut i = 0usize;
    let mut offset = 0u64;

    while i < dcts.len() {
        let mut bin = Vec::new();
        let mut in_bin = 0u64;
        while i < dcts.len() {
            let dct = &dcts[i];
            let remaining = dct.dwarf_count - offset;
            let space = per_bin - in_bin;
            if remaining <= space {
                bin.push(range_of(dct, offset, remaining));
                in_bin += remaining;
                offset = 0;
                i += 1;
            } else {
                bin.push(range_of(dct, offset, space));
                offset += space;
                break;
            }
        }
        bins.push(bin);
    }
    bins
}

fn range_of(dct: &DctInfo, offset: u64, count: u64) -> DwarfRange {
    DwarfRange {
        txid: dct.txid,
        reward_key: dct.reward_key,
        community_contrib: dct.community_contrib,
        offset,
        count,
    }
}

/// Hash every dwarf in the bin against the target, bailing out when another
/// worker finds a solution or the watcher requests an abort.
fn check_bin(
    thread_id: usize,
    bin: Vec<DwarfRange>,
    det_rand: String,
    target: BigUint,
    solution_found: Arc<AtomicBool>,
    early_abort: Arc<AtomicBool>,
    solution: Arc<Mutex<Option<HiveSolution>>>,
) {
    let mut check_count = 0u64;
    for range in bin {
        let txid_hex = range.txid.to_string();
        for i in range.offset..range.offset + range.count {
            if check_count % ABORT_POLL_INTERVAL == 0
                && (solution_found.load(Ordering::Relaxed) || early_abort.load(Ordering::Relaxed))
            {
                return;
            }
            check_count += 1;

            let hash = dwarf_hash(&det_rand, &txid_hex, i as u32);
            if hash_below_target(hash.as_bytes(), &target) {
                let Ok(mut slot) = solution.lock() else {
                    return;
                };
                // First finder wins; everyone else backs off.
                if solution_found.load(Ordering::Relaxed) {
                    return;
                }
                solution_found.store(true, Ordering::SeqCst);
                *slot = Some(HiveSolution {
                    range: range.clone(),
                    dwarf_index: i,
                });
                debug!(thread_id, dwarf = i, "hive worker found a solution");
                return;
            }
        }
    }
}

/// Watch the tip and flag an abort as soon as it moves.
fn abort_watch(
    chain: &impl ChainView,
    height: u64,
    solution_found: &AtomicBool,
    early_abort: &AtomicBool,
) {
    loop {
        thread::sleep(ABORT_WATCH_SLEEP);
        if solution_found.load(Ordering::Relaxed) || early_abort.load(Ordering::Relaxed) {
            return;
        }
        if chain.tip().height != height {
            early_abort.store(true, Ordering::SeqCst);
            return;
        }
    }
}

/// One full Hive mining attempt at the given height.
///
/// Returns `true` only when a block was mined and accepted; every failure
/// mode is logged and reported as `false` so the supervisor just waits for
/// the next tick.
pub fn busy_dwarves<C, M, W, N>(ctx: &MinerContext<C, M, W, N>, opts: &HiveOptions, height: u64) -> bool
where
    C: ChainView + 'static,
    M: MempoolView,
    W: WalletView,
    N: NetworkView,
{
    let params = &*ctx.params;

    // Pre-checks: network, sync state, slow start, hive quota, wallet.
    if ctx.network.peer_count() == 0 {
        debug!("busy_dwarves: skipping hive check (not connected)");
        return false;
    }
    if ctx.network.is_initial_block_download() {
        debug!("busy_dwarves: skipping hive check (in initial block download)");
        return false;
    }
    if height < params.hive_enable_height() {
        debug!("busy_dwarves: skipping hive check (slow start has not finished)");
        return false;
    }

    let tip = ctx.chain.tip();
    let mut hive_blocks_since_pow = 0u64;
    let mut cursor = match ctx.chain.header(&tip.hash) {
        Some(h) => h,
        None => return false,
    };
    while cursor.is_hive_mined(params) || cursor.is_pop_mined(params) {
        if cursor.is_hive_mined(params) {
            hive_blocks_since_pow += 1;
        }
        match ctx.chain.header(&cursor.prev) {
            Some(p) => cursor = p,
            None => break,
        }
    }
    if hive_blocks_since_pow >= params.max_consecutive_hive_blocks {
        info!("busy_dwarves: skipping hive check (max hive blocks without a pow block)");
        return false;
    }

    if ctx.wallet.is_locked() {
        debug!("busy_dwarves: skipping hive check (wallet is locked)");
        return false;
    }

    let prev = match ctx.chain.header(&tip.hash) {
        Some(h) => h,
        None => return false,
    };
    let det_rand = deterministic_rand_string(&prev);
    let target_bits = match next_hive_work_required(&*ctx.chain, &tip.hash, params) {
        Ok(bits) => bits,
        Err(err) => {
            warn!(%err, "busy_dwarves: no hive work target");
            return false;
        }
    };
    let Ok(target) = bits_to_target(target_bits) else {
        return false;
    };

    // Mature dwarves only.
    let dcts: Vec<DctInfo> = ctx
        .wallet
        .dcts()
        .into_iter()
        .filter(|d| d.status == DwarfStatus::Mature)
        .collect();
    let total_dwarves: u64 = dcts.iter().map(|d| d.dwarf_count).sum();
    if total_dwarves == 0 {
        debug!("busy_dwarves: no mature dwarves found");
        return false;
    }

    let thread_count = resolve_thread_count(opts.check_threads);
    let per_bin = total_dwarves.div_ceil(thread_count as u64);
    debug!(
        total_dwarves,
        thread_count, per_bin, "busy_dwarves: binning dwarves"
    );
    let bins = bin_dwarves(&dcts, per_bin);

    // Run the bins.
    let solution_found = Arc::new(AtomicBool::new(false));
    let early_abort = Arc::new(AtomicBool::new(false));
    let solution: Arc<Mutex<Option<HiveSolution>>> = Arc::new(Mutex::new(None));
    let started = Instant::now();

    let mut workers = Vec::with_capacity(bins.len());
    for (thread_id, bin) in bins.into_iter().enumerate() {
        let det_rand = det_rand.clone();
        let target = target.clone();
        let solution_found = Arc::clone(&solution_found);
        let early_abort = Arc::clone(&early_abort);
        let solution = Arc::clone(&solution);
        workers.push(thread::spawn(move || {
            check_bin(
                thread_id,
                bin,
                det_rand,
                target,
                solution_found,
                early_abort,
                solution,
            )
        }));
    }

    let watcher: Option<JoinHandle<()>> = if opts.early_out {
        let chain = Arc::clone(&ctx.chain);
        let solution_found = Arc::clone(&solution_found);
        let early_abort = Arc::clone(&early_abort);
        Some(thread::spawn(move || {
            abort_watch(&*chain, height, &solution_found, &early_abort)
        }))
    } else {
        None
    };

    for worker in workers {
        let _ = worker.join();
    }
    let check_millis = started.elapsed().as_millis();

    if let Some(watcher) = watcher {
        if early_abort.load(Ordering::SeqCst) {
            info!(check_millis, "busy_dwarves: chain state changed, check aborted");
            let _ = watcher.join();
            return false;
        }
        // We did not abort; release the watcher now.
        early_abort.store(true, Ordering::SeqCst);
        let _ = watcher.join();
    }

    if !solution_found.load(Ordering::SeqCst) {
        info!(
            total_dwarves,
            thread_count, check_millis, "busy_dwarves: no dwarf meets hash target"
        );
        return false;
    }
    let solved = match solution.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => None,
    };
    let Some(solved) = solved else {
        return false;
    };
    info!(
        dwarf = solved.dwarf_index,
        dct = %solved.range.txid,
        check_millis,
        "busy_dwarves: dwarf meets hash target"
    );

    // Assemble the proof: DCT height from the UTXO set, then the window
    // signature from the wallet key behind the reward destination.
    let out = OutPoint {
        txid: solved.range.txid,
        vout: 0,
    };
    let Some(coin) = ctx.chain.coin(&out) else {
        warn!("busy_dwarves: could not get the DCT utxo");
        return false;
    };
    let Some(key) = ctx.wallet.signing_key(&solved.range.reward_key) else {
        warn!("busy_dwarves: private key unavailable for reward destination");
        return false;
    };
    let signature = match sign_compact(&key, &hive_message_hash(&det_rand)) {
        Ok(sig) => sig,
        Err(err) => {
            warn!(%err, "busy_dwarves: could not sign the dwarf proof");
            return false;
        }
    };

    let proof = HiveProof::new(
        solved.dwarf_index as u32,
        coin.height as u32,
        solved.range.community_contrib,
        &solved.range.txid,
        signature,
    );
    let proof_script = match proof.encode() {
        Ok(script) => script,
        Err(err) => {
            warn!(%err, "busy_dwarves: could not encode hive proof");
            return false;
        }
    };

    let reward_script = Script::p2pkh(&solved.range.reward_key);
    let assembler = BlockAssembler::new(&*ctx.chain, &*ctx.mempool, params, ctx.options.clone());
    let template = match assembler.assemble(&reward_script, &BlockMode::Hive(proof_script)) {
        Ok(Some(template)) => template,
        Ok(None) | Err(_) => {
            warn!("busy_dwarves: could not create block");
            return false;
        }
    };

    let block = template.block;
    if block.header.prev != ctx.chain.tip().hash {
        info!("busy_dwarves: generated block is stale");
        return false;
    }
    if let Err(reason) = ctx.chain.submit_block(block) {
        warn!(%reason, "busy_dwarves: block was not accepted");
        return false;
    }

    info!("busy_dwarves: hive block mined");
    true
}

/// Supervisor: polls the tip and releases the dwarves on new blocks.
pub struct DwarfMaster {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DwarfMaster {
    /// Spawn the supervisor thread.
    pub fn start<C, M, W, N>(ctx: MinerContext<C, M, W, N>, opts: HiveOptions) -> Self
    where
        C: ChainView + 'static,
        M: MempoolView + 'static,
        W: WalletView + 'static,
        N: NetworkView + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            info!("dwarf master: thread started");
            let sleep = Duration::from_millis(opts.check_delay_ms.max(1));
            let mut height = ctx.chain.tip().height;
            while !stop_thread.load(Ordering::SeqCst) {
                thread::sleep(sleep);
                if stop_thread.load(Ordering::SeqCst) {
                    break;
                }
                let new_height = ctx.chain.tip().height;
                if new_height != height {
                    // Height changed; release the dwarves.
                    height = new_height;
                    busy_dwarves(&ctx, &opts, height);
                }
            }
            info!("dwarf master: thread terminated");
        });
        Self { stop, handle }
    }

    /// Signal the supervisor and join it.
    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

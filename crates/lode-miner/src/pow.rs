//! PoW mining: nonce search, extra-nonce plumbing, worker threads, and the
//! process-wide hashrate meter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::assembler::{AssemblerOptions, BlockAssembler, BlockMode};
use crate::context::{ChainView, NetworkView, WalletView};
use crate::error::MinerError;
use crate::mempool::MempoolView;
use lode_consensus::{bits_to_target, hash_meets_target};
use lode_core::{
    block_merkle_root, pow_hash, Amount, Block, BlockHeader, ConsensusParams, Hash32, Script,
    COINBASE_FLAGS, MAX_COINBASE_SCRIPT_SIG,
};
use num_bigint::BigUint;
use tracing::{debug, error, info, warn};

/// Nonce value above which the search space is considered exhausted.
pub const NONCE_EXHAUSTED: u32 = 0xffff_0000;

/// Sleep while waiting for peers or initial block download.
const NETWORK_WAIT: Duration = Duration::from_secs(10);

/// Rebuild the template when the mempool changed and this much time passed.
const MEMPOOL_REFRESH_SECS: u64 = 60;

/// Push the header time forward to `max(mtp + 1, adjusted time)`.
///
/// Returns the signed delta; a negative value means the clock ran backwards
/// relative to the header and the caller should rebuild.
pub fn update_time(
    header: &mut BlockHeader,
    chain: &impl ChainView,
    prev_hash: &Hash32,
) -> i64 {
    let old = header.time;
    let mtp = chain.median_time_past(prev_hash).unwrap_or(0);
    let new = chain.adjusted_time().max(mtp + 1);
    if new > old {
        header.time = new;
    }
    new as i64 - old as i64
}

/// Bump the coinbase extra-nonce and rewrite the scriptSig as
/// `height || extra_nonce || COINBASE_FLAGS`, recomputing the merkle root.
///
/// The extra-nonce resets to zero exactly when the previous-block hash
/// changes between calls; `last_prev` carries that state across templates.
pub fn increment_extra_nonce(
    block: &mut Block,
    height: u64,
    extra_nonce: &mut u32,
    last_prev: &mut Hash32,
) -> Result<(), MinerError> {
    if *last_prev != block.header.prev {
        *extra_nonce = 0;
        *last_prev = block.header.prev;
    }
    *extra_nonce += 1;

    let script_sig = Script::new()
        .push_int(height as i64)
        .push_int(i64::from(*extra_nonce))
        .concat(&Script::from_bytes(COINBASE_FLAGS.to_vec()));
    if script_sig.len() > MAX_COINBASE_SCRIPT_SIG {
        return Err(MinerError::ScriptSigTooLong);
    }
    block.txs[0].inputs[0].script_sig = script_sig;
    let merkle_root = block_merkle_root(block)?;
    block.header.merkle_root = merkle_root;
    Ok(())
}

/// Scan nonces until a candidate digest with sixteen leading zero bits
/// turns up.
///
/// Returns `Some(digest)` for a candidate (the caller checks the real
/// target), or `None` after 65536 attempts so the outer loop can re-check
/// its restart conditions. The stop flag is polled every 4096 nonces.
pub fn scan_hash(
    header: &mut BlockHeader,
    nonce: &mut u32,
    stop: &AtomicBool,
) -> Result<Option<Hash32>, MinerError> {
    loop {
        *nonce = nonce.wrapping_add(1);
        header.nonce = *nonce;
        let digest = pow_hash(header)?;

        // Cheap pre-filter: top two bytes of the digest must be zero.
        if digest.as_bytes()[0] == 0 && digest.as_bytes()[1] == 0 {
            return Ok(Some(digest));
        }

        if *nonce & 0xffff == 0 {
            return Ok(None);
        }

        if *nonce & 0xfff == 0 && stop.load(Ordering::Relaxed) {
            return Ok(None);
        }
    }
}

/// A burn-vote entry for RNG blocks.
#[derive(Clone, Debug)]
pub struct BurnVote {
    /// Amount burned.
    pub amount: Amount,
}

/// Pick the winning burn for an RNG block, seeded by the prior block hash.
///
/// TODO: wire up burn-transaction collection; until then every call sees an
/// empty set and returns `None`, which keeps RNG blocks indistinguishable
/// from ordinary PoW blocks.
pub fn select_burn_winner<'a>(
    burns: &'a [BurnVote],
    seed: &Hash32,
    params: &ConsensusParams,
) -> Option<&'a BurnVote> {
    let mut total_votes = 0u64;
    for burn in burns {
        if burn.amount >= params.min_burn_amount {
            total_votes += burn.amount.atoms() / params.burn_vote_ratio;
        }
    }
    if total_votes == 0 {
        return None;
    }

    let rand = u64::from_le_bytes(seed.as_bytes()[..8].try_into().ok()?);
    let winning_vote = rand % total_votes;

    let mut vote_count = 0u64;
    for burn in burns {
        if burn.amount < params.min_burn_amount {
            continue;
        }
        let votes = burn.amount.atoms() / params.burn_vote_ratio;
        if vote_count <= winning_vote && winning_vote < vote_count + votes {
            return Some(burn);
        }
        vote_count += votes;
    }
    None
}

/// Process-wide hashes-per-second estimate.
///
/// The counter is cheap to bump; the rate is folded roughly every four
/// seconds behind a double-checked window gate, and logged at most every
/// thirty minutes.
pub struct HashrateMeter {
    hashes: AtomicU64,
    window_start_ms: AtomicU64,
    state: Mutex<MeterState>,
}

struct MeterState {
    hashes_per_sec: f64,
    last_log_ms: u64,
}

const METER_WINDOW_MS: u64 = 4_000;
const METER_LOG_INTERVAL_MS: u64 = 30 * 60 * 1_000;

impl Default for HashrateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl HashrateMeter {
    /// A meter with an empty window.
    pub fn new() -> Self {
        Self {
            hashes: AtomicU64::new(0),
            window_start_ms: AtomicU64::new(0),
            state: Mutex::new(MeterState {
                hashes_per_sec: 0.0,
                last_log_ms: 0,
            }),
        }
    }

    /// Record hashes done; folds the window when it is old enough.
    pub fn record(&self, hashes_done: u64) {
        let now = now_millis();
        if self
            .window_start_ms
            .compare_exchange(0, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return;
        }
        self.hashes.fetch_add(hashes_done, Ordering::Relaxed);

        // First check outside the lock, second inside.
        if now.saturating_sub(self.window_start_ms.load(Ordering::SeqCst)) <= METER_WINDOW_MS {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let start = self.window_start_ms.load(Ordering::SeqCst);
        let elapsed = now.saturating_sub(start);
        if elapsed <= METER_WINDOW_MS {
            return;
        }
        let hashes = self.hashes.swap(0, Ordering::SeqCst);
        self.window_start_ms.store(now, Ordering::SeqCst);
        state.hashes_per_sec = 1000.0 * hashes as f64 / elapsed as f64;

        if now.saturating_sub(state.last_log_ms) > METER_LOG_INTERVAL_MS {
            state.last_log_ms = now;
            info!(
                khash_per_sec = state.hashes_per_sec / 1000.0,
                "miner hashrate"
            );
        }
    }

    /// Latest folded estimate.
    pub fn hashes_per_sec(&self) -> f64 {
        self.state.lock().map(|s| s.hashes_per_sec).unwrap_or(0.0)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Everything a mining loop needs from the node, bundled for thread spawns.
pub struct MinerContext<C, M, W, N> {
    /// Chain state and submission.
    pub chain: Arc<C>,
    /// Mempool query surface.
    pub mempool: Arc<M>,
    /// Wallet surface.
    pub wallet: Arc<W>,
    /// Networking facts.
    pub network: Arc<N>,
    /// Consensus parameters.
    pub params: Arc<ConsensusParams>,
    /// Assembly policy.
    pub options: AssemblerOptions,
}

impl<C, M, W, N> Clone for MinerContext<C, M, W, N> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            mempool: Arc::clone(&self.mempool),
            wallet: Arc::clone(&self.wallet),
            network: Arc::clone(&self.network),
            params: Arc::clone(&self.params),
            options: self.options.clone(),
        }
    }
}

/// Handle over the pool of PoW worker threads.
pub struct PowMiner {
    stop: Arc<AtomicBool>,
    meter: Arc<HashrateMeter>,
    workers: Vec<JoinHandle<()>>,
}

impl PowMiner {
    /// Spawn `threads` workers (negative: one per core).
    pub fn start<C, M, W, N>(ctx: MinerContext<C, M, W, N>, threads: i64) -> Self
    where
        C: ChainView + 'static,
        M: MempoolView + 'static,
        W: WalletView + 'static,
        N: NetworkView + 'static,
    {
        let threads = if threads < 0 {
            num_cpus::get()
        } else {
            threads as usize
        };
        let stop = Arc::new(AtomicBool::new(false));
        let meter = Arc::new(HashrateMeter::new());

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let ctx = ctx.clone();
            let stop = Arc::clone(&stop);
            let meter = Arc::clone(&meter);
            workers.push(thread::spawn(move || {
                info!(worker = id, "miner thread started");
                if let Err(err) = miner_thread(&ctx, &stop, &meter) {
                    error!(worker = id, %err, "miner thread exited with error");
                }
                info!(worker = id, "miner thread terminated");
            }));
        }

        Self {
            stop,
            meter,
            workers,
        }
    }

    /// Shared hashrate meter.
    pub fn meter(&self) -> Arc<HashrateMeter> {
        Arc::clone(&self.meter)
    }

    /// Signal all workers and join them.
    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

/// One worker: build a template, grind nonces, submit, repeat.
fn miner_thread<C, M, W, N>(
    ctx: &MinerContext<C, M, W, N>,
    stop: &AtomicBool,
    meter: &HashrateMeter,
) -> Result<(), MinerError>
where
    C: ChainView,
    M: MempoolView,
    W: WalletView,
    N: NetworkView,
{
    let params = &*ctx.params;
    let mut extra_nonce = 0u32;
    let mut last_prev = Hash32::zero();

    let coinbase_script = ctx
        .wallet
        .mining_script()
        .ok_or(MinerError::Wallet("keypool ran out; refill and restart"))?;

    while !stop.load(Ordering::SeqCst) {
        // Wait for the network unless blocks are mined on demand.
        if !params.mine_blocks_on_demand {
            loop {
                if ctx.network.peer_count() > 0 && !ctx.network.is_initial_block_download() {
                    break;
                }
                if ctx.network.is_initial_block_download() {
                    debug!("miner: initial block download; sleeping");
                } else {
                    debug!("miner: no peers; sleeping");
                }
                thread::sleep(NETWORK_WAIT);
                if stop.load(Ordering::SeqCst) {
                    return Ok(());
                }
            }
        }

        let transactions_updated_last = ctx.mempool.transactions_updated();
        let tip = ctx.chain.tip();

        // RNG block: burn voting is not collected yet, so the winner
        // selection is a no-op placeholder.
        if params.rng_block_spacing > 0 && tip.height % params.rng_block_spacing == 0 {
            let _winner = select_burn_winner(&[], &tip.hash, params);
        }

        let assembler =
            BlockAssembler::new(&*ctx.chain, &*ctx.mempool, params, ctx.options.clone());
        let template = assembler
            .assemble(&coinbase_script, &BlockMode::Pow)?
            .ok_or(MinerError::Assembly("no template"))?;

        let mut block = template.block;
        increment_extra_nonce(&mut block, tip.height + 1, &mut extra_nonce, &mut last_prev)?;

        info!(txs = block.txs.len(), "miner: running");
        let start_secs = now_millis() / 1000;
        let mut hash_target: BigUint = bits_to_target(block.header.bits)?;
        let mut nonce = 0u32;
        let mut old_nonce = 0u32;

        loop {
            let found = scan_hash(&mut block.header, &mut nonce, stop)?;
            let hashes_done = nonce.wrapping_sub(old_nonce);
            old_nonce = nonce;
            meter.record(u64::from(hashes_done));

            if let Some(digest) = found {
                if hash_meets_target(digest.as_bytes(), &hash_target) {
                    // Re-verify before shouting about it.
                    debug_assert_eq!(pow_hash(&block.header).ok(), Some(digest));
                    info!(hash = %digest, "miner: block found");

                    if block.header.prev != ctx.chain.tip().hash {
                        warn!("miner: generated block is stale");
                        break;
                    }
                    if let Err(reason) = ctx.chain.submit_block(block.clone()) {
                        warn!(%reason, "miner: block was not accepted");
                        break;
                    }
                    ctx.wallet.keep_script();

                    if params.mine_blocks_on_demand {
                        // One block per run on regtest.
                        return Ok(());
                    }
                    break;
                }
            }

            // Restart conditions.
            if stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            if !params.mine_blocks_on_demand && ctx.network.peer_count() == 0 {
                break;
            }
            if nonce >= NONCE_EXHAUSTED {
                break;
            }
            if ctx.mempool.transactions_updated() != transactions_updated_last
                && now_millis() / 1000 > start_secs + MEMPOOL_REFRESH_SECS
            {
                break;
            }
            if ctx.chain.tip().hash != tip.hash {
                break;
            }
            if update_time(&mut block.header, &*ctx.chain, &tip.hash) < 0 {
                // Clock ran backwards.
                break;
            }
            if params.allow_min_difficulty_blocks {
                // Changing the header time can change work required on testnet.
                hash_target = bits_to_target(block.header.bits)?;
            }
        }
    }

    Ok(())
}

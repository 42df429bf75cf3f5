#![forbid(unsafe_code)]

mod chain_store;
mod wallet;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chain_store::ChainStore;
use clap::{ArgAction, Parser, ValueEnum};
use lode_core::{
    block_merkle_root, Amount, Block, BlockHeader, ConsensusParams, Hash32, KeyId, Script, TxIn,
    TxOut, Transaction, PROTOCOL_VERSION,
};
use lode_miner::{
    DwarfMaster, MinerArgs, MinerContext, NetworkView, PowMiner, StaticMempool,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wallet::DevWallet;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Parser, Debug)]
#[command(name = "lode-node", version, about = "Lode devnet node and miner")]
struct Cli {
    /// Chain database directory.
    #[arg(long, default_value = "lode.chain.db")]
    datadir: PathBuf,

    /// Which network's consensus rules to run.
    #[arg(long, value_enum, default_value = "regtest")]
    network: Network,

    /// PoW miner threads (0 disables PoW mining, negative: one per core).
    #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
    threads: i64,

    /// Run the Hive dwarf master.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    hive: bool,

    #[command(flatten)]
    miner: MinerArgs,
}

/// Devnet networking stub: the miners' peer/IBD gates always pass.
struct DevnetNetwork;

impl NetworkView for DevnetNetwork {
    fn peer_count(&self) -> usize {
        1
    }

    fn is_initial_block_download(&self) -> bool {
        false
    }
}

fn params_for(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => ConsensusParams::mainnet(),
        Network::Testnet => ConsensusParams::testnet(),
        Network::Regtest => ConsensusParams::regtest(),
    }
}

/// Deterministic genesis block: one coinbase paying an unspendable key.
fn build_genesis(params: &ConsensusParams) -> Block {
    let coinbase = Transaction {
        version: PROTOCOL_VERSION,
        inputs: vec![TxIn::coinbase(Script::new().push_int(0).push_int(0))],
        outputs: vec![TxOut {
            value: Amount::zero(),
            script_pubkey: Script::p2pkh(&KeyId([0; 20])),
        }],
        lock_time: 0,
    };
    let mut block = Block {
        header: BlockHeader {
            version: PROTOCOL_VERSION,
            prev: Hash32::zero(),
            merkle_root: Hash32::zero(),
            time: 1_735_689_600,
            bits: params.pow_limit_initial_bits,
            nonce: 0,
        },
        txs: vec![coinbase],
    };
    block.header.merkle_root = block_merkle_root(&block).expect("genesis merkle root");
    block
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let params = params_for(cli.network);
    info!(network = ?cli.network, datadir = %cli.datadir.display(), "starting lode-node");

    let genesis = build_genesis(&params);
    let store = Arc::new(
        ChainStore::load_or_init(&cli.datadir, genesis, params.clone())
            .map_err(|e| anyhow!("chain store: {e}"))?,
    );
    let wallet = Arc::new(DevWallet::ephemeral(Arc::clone(&store), params.clone()));
    info!(address = %wallet.address(), "devnet wallet ready");

    let ctx = MinerContext {
        chain: Arc::clone(&store),
        mempool: Arc::new(StaticMempool::new()),
        wallet,
        network: Arc::new(DevnetNetwork),
        params: Arc::new(params),
        options: cli.miner.assembler_options(),
    };

    let _dwarf_master = cli
        .hive
        .then(|| DwarfMaster::start(ctx.clone(), cli.miner.hive_options()));
    let pow = (cli.threads != 0).then(|| PowMiner::start(ctx.clone(), cli.threads));

    let meter = pow.as_ref().map(|p| p.meter());
    loop {
        thread::sleep(Duration::from_secs(60));
        let tip = store.best_height();
        match &meter {
            Some(meter) => info!(
                height = tip,
                hashes_per_sec = meter.hashes_per_sec(),
                "node status"
            ),
            None => info!(height = tip, "node status"),
        }
    }
}

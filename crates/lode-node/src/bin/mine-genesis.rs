//! Grind a genesis block for one of the lode networks and print its
//! parameters, so they can be pinned in the chain configuration.

use clap::{Parser, ValueEnum};
use lode_consensus::check_proof_of_work;
use lode_core::{
    block_header_hash, block_merkle_root, pow_hash, Amount, Block, BlockHeader, ConsensusParams,
    Hash32, KeyId, Script, Transaction, TxIn, TxOut, PROTOCOL_VERSION,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Parser, Debug)]
#[command(name = "mine-genesis", about = "Search a genesis nonce")]
struct Cli {
    #[arg(long, value_enum, default_value = "mainnet")]
    network: Network,

    /// Genesis header timestamp (Unix seconds).
    #[arg(long, default_value_t = 1_735_689_600)]
    time: u64,
}

fn main() {
    let cli = Cli::parse();
    let params = match cli.network {
        Network::Mainnet => ConsensusParams::mainnet(),
        Network::Testnet => ConsensusParams::testnet(),
        Network::Regtest => ConsensusParams::regtest(),
    };

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
            time: cli.time,
            bits: params.pow_limit_initial_bits,
            nonce: 0,
        },
        txs: vec![coinbase],
    };
    block.header.merkle_root = block_merkle_root(&block).expect("merkle root");

    loop {
        let digest = pow_hash(&block.header).expect("pow hash");
        if check_proof_of_work(&digest, block.header.bits, &params).is_ok() {
            break;
        }
        block.header.nonce = block.header.nonce.wrapping_add(1);
        if block.header.nonce == params.hive_nonce_marker
            || block.header.nonce == params.pop_nonce_marker
        {
            block.header.nonce += 2;
        }
    }

    println!("network      : {:?}", cli.network);
    println!("time         : {}", block.header.time);
    println!("bits         : 0x{:08x}", block.header.bits);
    println!("nonce        : {}", block.header.nonce);
    println!("merkle root  : {}", block.header.merkle_root);
    println!(
        "genesis hash : {}",
        block_header_hash(&block.header).expect("header hash")
    );
}

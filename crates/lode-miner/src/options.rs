//! CLI surface for the mining subsystem.

use crate::assembler::AssemblerOptions;
use crate::hive::HiveOptions;
use clap::Args;
use lode_core::{COINBASE_WEIGHT_RESERVE, MAX_BLOCK_WEIGHT};

/// Default assembled-block weight ceiling.
pub const DEFAULT_BLOCK_MAX_WEIGHT: u64 = MAX_BLOCK_WEIGHT - COINBASE_WEIGHT_RESERVE;

/// Default minimum package feerate (atoms per 1000 vsize).
pub const DEFAULT_BLOCK_MIN_TX_FEE: u64 = 1000;

/// Default supervisor poll interval for the dwarf master, in milliseconds.
pub const DEFAULT_HIVE_CHECK_DELAY: u64 = 1000;

/// Default hive worker count sentinel (cores − 1).
pub const DEFAULT_HIVE_THREADS: i64 = -2;

/// Mining flags, flattened into the node's CLI.
#[derive(Args, Clone, Debug)]
pub struct MinerArgs {
    /// Maximum weight of assembled blocks.
    #[arg(long, default_value_t = DEFAULT_BLOCK_MAX_WEIGHT)]
    pub blockmaxweight: u64,

    /// Minimum package feerate for block inclusion (atoms per 1000 vsize).
    #[arg(long, default_value_t = DEFAULT_BLOCK_MIN_TX_FEE)]
    pub blockmintxfee: u64,

    /// Override the assembled header version (regtest only).
    #[arg(long)]
    pub blockversion: Option<u16>,

    /// Log the feerate of every transaction added to a block.
    #[arg(long, default_value_t = false)]
    pub printpriority: bool,

    /// Milliseconds between dwarf-master tip polls.
    #[arg(long, default_value_t = DEFAULT_HIVE_CHECK_DELAY)]
    pub hivecheckdelay: u64,

    /// Hive worker threads: -2 = cores − 1, 0 = one, out of range = cores.
    #[arg(long, default_value_t = DEFAULT_HIVE_THREADS, allow_hyphen_values = true)]
    pub hivecheckthreads: i64,

    /// Abort in-flight dwarf checks as soon as the tip moves.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub hiveearlyout: bool,
}

impl Default for MinerArgs {
    fn default() -> Self {
        Self {
            blockmaxweight: DEFAULT_BLOCK_MAX_WEIGHT,
            blockmintxfee: DEFAULT_BLOCK_MIN_TX_FEE,
            blockversion: None,
            printpriority: false,
            hivecheckdelay: DEFAULT_HIVE_CHECK_DELAY,
            hivecheckthreads: DEFAULT_HIVE_THREADS,
            hiveearlyout: true,
        }
    }
}

impl MinerArgs {
    /// Assembly policy derived from the flags (clamped).
    pub fn assembler_options(&self) -> AssemblerOptions {
        AssemblerOptions {
            block_max_weight: self.blockmaxweight,
            block_min_fee_rate: self.blockmintxfee,
            print_priority: self.printpriority,
            block_version: self.blockversion,
        }
        .clamped()
    }

    /// Hive miner policy derived from the flags.
    pub fn hive_options(&self) -> HiveOptions {
        HiveOptions {
            check_delay_ms: self.hivecheckdelay.max(1),
            check_threads: self.hivecheckthreads,
            early_out: self.hiveearlyout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_ceiling_is_clamped() {
        let args = MinerArgs {
            blockmaxweight: u64::MAX,
            ..MinerArgs::default()
        };
        assert_eq!(
            args.assembler_options().block_max_weight,
            MAX_BLOCK_WEIGHT - COINBASE_WEIGHT_RESERVE
        );

        let tiny = MinerArgs {
            blockmaxweight: 1,
            ..MinerArgs::default()
        };
        assert_eq!(
            tiny.assembler_options().block_max_weight,
            COINBASE_WEIGHT_RESERVE
        );
    }
}

// Consensus-critical. Changes require spec update + tests.
//! Block subsidy schedules for the three production modes.

use lode_core::{Amount, ConsensusParams};

/// Subsidy of a PoW block at the given height.
///
/// Halves every `subsidy_halving_interval` blocks. After the initial
/// distribution the reward ramps up linearly across the slow-start window
/// so early hash power cannot sweep the full emission.
pub fn block_subsidy_pow(height: u64, params: &ConsensusParams) -> Amount {
    let epochs = height / params.subsidy_halving_interval;
    let base = if epochs >= 63 {
        0
    } else {
        params.pow_initial_subsidy.atoms() >> epochs
    };

    let start = params.last_initial_distribution_height;
    if params.slow_start_blocks > 0 && height > start && height <= start + params.slow_start_blocks
    {
        let ramp = height - start;
        return Amount::from_atoms(base / params.slow_start_blocks * ramp);
    }

    Amount::from_atoms(base)
}

/// Subsidy of a Hive-mined block.
pub fn block_subsidy_hive(params: &ConsensusParams) -> Amount {
    params.hive_subsidy
}

/// Subsidy of a Pop block attesting a private game.
pub fn block_subsidy_pop_private(params: &ConsensusParams) -> Amount {
    params.pop_subsidy_private
}

/// Subsidy of a Pop block attesting a public game.
pub fn block_subsidy_pop_public(params: &ConsensusParams) -> Amount {
    params.pop_subsidy_public
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow_subsidy_halves() {
        let params = ConsensusParams::mainnet();
        let h = params.last_initial_distribution_height + params.slow_start_blocks + 1;
        let first = block_subsidy_pow(h, &params);
        let after_halving = block_subsidy_pow(h + params.subsidy_halving_interval, &params);
        assert_eq!(after_halving.atoms() * 2, first.atoms());
    }

    #[test]
    fn slow_start_ramps_linearly() {
        let params = ConsensusParams::mainnet();
        let start = params.last_initial_distribution_height;
        let full = params.pow_initial_subsidy.atoms();

        let early = block_subsidy_pow(start + 1, &params);
        let mid = block_subsidy_pow(start + params.slow_start_blocks / 2, &params);
        let done = block_subsidy_pow(start + params.slow_start_blocks, &params);

        assert!(early.atoms() < mid.atoms());
        assert!(mid.atoms() < full);
        assert_eq!(done.atoms(), full);
    }

    #[test]
    fn mode_subsidies_are_distinct() {
        let params = ConsensusParams::mainnet();
        assert!(block_subsidy_hive(&params).atoms() > 0);
        assert_ne!(
            block_subsidy_pop_private(&params),
            block_subsidy_pop_public(&params)
        );
    }
}

//! Stake-derived weights, demotion and the weighted proposer permutation

use ibft_core::{Address, Hash};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::{BTreeMap, BTreeSet};

/// Voting weight of each council member, as a percentage of total stake
///
/// Shares are rounded to the nearest percent; a validator with any stake gets
/// at least 1. With no stake at all every member weighs 1.
pub fn calc_weights(council: &[Address], stakes: &BTreeMap<Address, u64>) -> BTreeMap<Address, u64> {
    let total: u128 = council
        .iter()
        .map(|addr| u128::from(stakes.get(addr).copied().unwrap_or(0)))
        .sum();

    council
        .iter()
        .map(|addr| {
            if total == 0 {
                return (*addr, 1);
            }
            let stake = u128::from(stakes.get(addr).copied().unwrap_or(0));
            let weight = (stake * 100 + total / 2) / total;
            let weight = if stake > 0 { weight.max(1) } else { 0 };
            (*addr, weight as u64)
        })
        .collect()
}

/// Council members whose stake is below `minimum_stake`
///
/// The governing node is never demoted. If every member would be demoted,
/// nobody is, so the chain can still make progress.
pub fn calc_demoted(
    council: &[Address],
    stakes: &BTreeMap<Address, u64>,
    minimum_stake: u64,
    governing_node: Option<Address>,
) -> BTreeSet<Address> {
    let demoted: BTreeSet<Address> = council
        .iter()
        .filter(|addr| Some(**addr) != governing_node)
        .filter(|addr| stakes.get(*addr).copied().unwrap_or(0) < minimum_stake)
        .copied()
        .collect();

    if demoted.len() == council.len() {
        return BTreeSet::new();
    }
    demoted
}

/// Build the weighted proposer permutation
///
/// Each candidate appears `weight` times; the list is then shuffled with a
/// ChaCha RNG seeded from `seed`. Candidates without weight appear once when
/// nobody has weight.
pub fn build_proposers(
    candidates: &[Address],
    weights: &BTreeMap<Address, u64>,
    seed: Hash,
) -> Vec<Address> {
    let mut proposers: Vec<Address> = candidates
        .iter()
        .flat_map(|addr| {
            let weight = weights.get(addr).copied().unwrap_or(0) as usize;
            std::iter::repeat(*addr).take(weight)
        })
        .collect();

    if proposers.is_empty() {
        proposers = candidates.to_vec();
    }

    let mut rng = ChaCha20Rng::from_seed(*seed.as_bytes());
    proposers.shuffle(&mut rng);
    proposers
}

/// Deterministic shuffle of a validator list
pub fn shuffle_validators(validators: &[Address], seed: Hash) -> Vec<Address> {
    let mut shuffled = validators.to_vec();
    let mut rng = ChaCha20Rng::from_seed(*seed.as_bytes());
    shuffled.shuffle(&mut rng);
    shuffled
}

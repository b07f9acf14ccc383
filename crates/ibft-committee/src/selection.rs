//! Proposer and committee selection
//!
//! ## Proposer
//!
//! | policy          | proposer for round `r`                              |
//! |-----------------|-----------------------------------------------------|
//! | round-robin     | `qualified[(index(last) + 1 + r) % n]`              |
//! | sticky          | `qualified[(index(last) + r) % n]`                  |
//! | weighted-random | `proposers[(height + r) % len]`, skipping demoted   |
//!
//! Once a randomness beacon is active it overrides all of the above.
//!
//! ## Committee
//!
//! The committee for round `r` starts with the proposers of rounds `r` and
//! `r + 1`, followed by the remaining qualified validators shuffled by the
//! previous block hash, truncated to the committee size.

use crate::error::{CommitteeError, Result};
use crate::validator_set::{CouncilKind, ValidatorSet};
use crate::weights::shuffle_validators;
use ibft_core::{Address, Hash, ProposerPolicy};

/// Source of beacon-driven proposers
pub trait ProposerBeacon: Send + Sync {
    /// Proposer for `(height, round)`, or `None` to fall back to the policy
    fn proposer(&self, qualified: &[Address], height: u64, round: u64) -> Option<Address>;
}

/// Beacon derived from the parent header's mix hash
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MixHashBeacon {
    mix_hash: Hash,
}

impl MixHashBeacon {
    pub fn new(mix_hash: Hash) -> Self {
        Self { mix_hash }
    }
}

impl ProposerBeacon for MixHashBeacon {
    fn proposer(&self, qualified: &[Address], _height: u64, round: u64) -> Option<Address> {
        if qualified.is_empty() {
            return None;
        }
        let order = shuffle_validators(qualified, self.mix_hash);
        Some(order[(round % order.len() as u64) as usize])
    }
}

/// Inputs that select a round's proposer and committee
#[derive(Clone, Copy)]
pub struct RoundContext<'a> {
    /// Height being decided
    pub height: u64,

    /// Round at that height
    pub round: u64,

    /// Hash of the block at `height - 1`
    pub prev_hash: Hash,

    /// Proposer of the block at `height - 1` (zero if unknown)
    pub last_proposer: Address,

    /// Beacon override, once active
    pub beacon: Option<&'a dyn ProposerBeacon>,
}

impl<'a> RoundContext<'a> {
    pub fn new(height: u64, round: u64, prev_hash: Hash, last_proposer: Address) -> Self {
        Self {
            height,
            round,
            prev_hash,
            last_proposer,
            beacon: None,
        }
    }

    pub fn with_beacon(mut self, beacon: &'a dyn ProposerBeacon) -> Self {
        self.beacon = Some(beacon);
        self
    }

    /// Same context, another round
    pub fn at_round(&self, round: u64) -> Self {
        Self { round, ..*self }
    }
}

impl std::fmt::Debug for RoundContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundContext")
            .field("height", &self.height)
            .field("round", &self.round)
            .field("prev_hash", &self.prev_hash)
            .field("last_proposer", &self.last_proposer)
            .field("beacon", &self.beacon.is_some())
            .finish()
    }
}

/// Proposer for the context's round
pub fn select_proposer(set: &ValidatorSet, ctx: &RoundContext<'_>) -> Result<Address> {
    let qualified = set.qualified();
    if qualified.is_empty() {
        return Err(CommitteeError::NoValidator);
    }

    if let Some(beacon) = ctx.beacon {
        if let Some(proposer) = beacon.proposer(&qualified, ctx.height, ctx.round) {
            return Ok(proposer);
        }
    }

    if let CouncilKind::Weighted(weighted) = set.kind() {
        if let Some(proposer) = pick_weighted(set, &weighted.proposers, ctx) {
            return Ok(proposer);
        }
    }

    let last = qualified.iter().position(|addr| *addr == ctx.last_proposer);
    let offset = match (set.policy(), last) {
        (ProposerPolicy::Sticky, Some(idx)) => idx as u64,
        (_, Some(idx)) => idx as u64 + 1,
        (_, None) => 0,
    };
    let n = qualified.len() as u64;
    Ok(qualified[((offset + ctx.round % n) % n) as usize])
}

fn pick_weighted(set: &ValidatorSet, proposers: &[Address], ctx: &RoundContext<'_>) -> Option<Address> {
    if proposers.is_empty() {
        return None;
    }
    let len = proposers.len() as u64;
    let start = ctx.height.wrapping_add(ctx.round) % len;
    (0..len)
        .map(|i| proposers[((start + i) % len) as usize])
        .find(|addr| set.is_qualified(addr))
}

/// Committee for the context's round, led by its proposer
pub fn select_committee(
    set: &ValidatorSet,
    ctx: &RoundContext<'_>,
    proposer: Address,
) -> Result<Vec<Address>> {
    let qualified = set.qualified();
    if qualified.is_empty() {
        return Err(CommitteeError::NoValidator);
    }

    let size = usize::try_from(set.committee_size())
        .unwrap_or(usize::MAX)
        .min(qualified.len());
    if size == qualified.len() {
        return Ok(qualified);
    }

    let mut committee = Vec::with_capacity(size);
    committee.push(proposer);

    let next_proposer = select_proposer(set, &ctx.at_round(ctx.round + 1))?;
    if next_proposer != proposer && committee.len() < size {
        committee.push(next_proposer);
    }

    let rest: Vec<Address> = qualified
        .into_iter()
        .filter(|addr| !committee.contains(addr))
        .collect();
    for addr in shuffle_validators(&rest, ctx.prev_hash) {
        if committee.len() >= size {
            break;
        }
        committee.push(addr);
    }

    Ok(committee)
}

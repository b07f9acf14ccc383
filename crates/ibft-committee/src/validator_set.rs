//! Validator set (council)
//!
//! A `ValidatorSet` is an immutable value: every change returns a new set.
//! The council is kept sorted so that index-based proposer rotation is the
//! same on every node.

use crate::error::{CommitteeError, Result};
use crate::weights::{build_proposers, calc_weights};
use ibft_core::{Address, Hash, ProposerPolicy};
use ibft_crypto::SignerCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default committee size when none is configured
pub const DEFAULT_COMMITTEE_SIZE: u64 = 21;

/// Stake data carried by a weighted council
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedCouncil {
    /// Staked amount per council member
    pub stakes: BTreeMap<Address, u64>,

    /// Weight per council member (percent of total stake)
    pub weights: BTreeMap<Address, u64>,

    /// Weighted proposer permutation
    pub proposers: Vec<Address>,

    /// Block whose hash seeded `proposers`
    pub proposers_block: u64,
}

/// Council variant, selected by proposer policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouncilKind {
    /// Round-robin and sticky policies: every member weighs the same
    Fixed,

    /// Weighted-random policy
    Weighted(WeightedCouncil),
}

impl CouncilKind {
    fn for_policy(policy: ProposerPolicy) -> Self {
        if policy.is_weighted() {
            CouncilKind::Weighted(WeightedCouncil::default())
        } else {
            CouncilKind::Fixed
        }
    }
}

/// Validators authorized at one height
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    policy: ProposerPolicy,
    committee_size: u64,
    council: Vec<Address>,
    demoted: BTreeSet<Address>,
    kind: CouncilKind,
}

impl ValidatorSet {
    /// Create a set from council members; duplicates are dropped
    pub fn new(mut council: Vec<Address>, policy: ProposerPolicy, committee_size: u64) -> Self {
        council.sort();
        council.dedup();
        Self {
            policy,
            committee_size: committee_size.max(1),
            council,
            demoted: BTreeSet::new(),
            kind: CouncilKind::for_policy(policy),
        }
    }

    pub fn policy(&self) -> ProposerPolicy {
        self.policy
    }

    pub fn committee_size(&self) -> u64 {
        self.committee_size
    }

    pub fn kind(&self) -> &CouncilKind {
        &self.kind
    }

    /// Stake data, if this is a weighted council
    pub fn weighted(&self) -> Option<&WeightedCouncil> {
        match &self.kind {
            CouncilKind::Weighted(weighted) => Some(weighted),
            CouncilKind::Fixed => None,
        }
    }

    /// Every registered validator, sorted
    pub fn council(&self) -> &[Address] {
        &self.council
    }

    /// Council minus demoted, sorted
    pub fn qualified(&self) -> Vec<Address> {
        self.council
            .iter()
            .filter(|addr| !self.demoted.contains(*addr))
            .copied()
            .collect()
    }

    /// Demoted council members, sorted
    pub fn demoted(&self) -> Vec<Address> {
        self.demoted.iter().copied().collect()
    }

    pub fn is_council_member(&self, address: &Address) -> bool {
        self.council.binary_search(address).is_ok()
    }

    pub fn is_qualified(&self, address: &Address) -> bool {
        self.is_council_member(address) && !self.demoted.contains(address)
    }

    pub fn is_demoted(&self, address: &Address) -> bool {
        self.demoted.contains(address)
    }

    /// Position of a qualified validator in the qualified list
    pub fn qualified_index(&self, address: &Address) -> Option<usize> {
        self.qualified().iter().position(|addr| addr == address)
    }

    pub fn len(&self) -> usize {
        self.council.len()
    }

    pub fn is_empty(&self) -> bool {
        self.council.is_empty()
    }

    pub fn qualified_len(&self) -> usize {
        self.council.len() - self.demoted.len()
    }

    /// Recover the signer of `data` and require it to be qualified
    pub fn check_validator_signature(
        &self,
        data: &[u8],
        signature: &[u8],
        signers: &SignerCache,
    ) -> Result<Address> {
        let signer = signers.recover(data, signature)?;
        if !self.is_qualified(&signer) {
            return Err(CommitteeError::Unauthorized(signer));
        }
        Ok(signer)
    }

    /// New set including `address`
    pub fn with_added(&self, address: Address) -> Self {
        let mut next = self.clone();
        if let Err(pos) = next.council.binary_search(&address) {
            next.council.insert(pos, address);
        }
        next
    }

    /// New set without `address`
    pub fn with_removed(&self, address: &Address) -> Self {
        let mut next = self.clone();
        next.council.retain(|addr| addr != address);
        next.demoted.remove(address);
        if let CouncilKind::Weighted(weighted) = &mut next.kind {
            weighted.stakes.remove(address);
            weighted.weights.remove(address);
            weighted.proposers.retain(|addr| addr != address);
        }
        next
    }

    /// New set under a different proposer policy
    ///
    /// Switching between fixed and weighted policies resets stake data.
    pub fn with_policy(&self, policy: ProposerPolicy) -> Self {
        let mut next = self.clone();
        if policy.is_weighted() != self.policy.is_weighted() {
            next.kind = CouncilKind::for_policy(policy);
            next.demoted.clear();
        }
        next.policy = policy;
        next
    }

    pub fn with_committee_size(&self, committee_size: u64) -> Self {
        let mut next = self.clone();
        next.committee_size = committee_size.max(1);
        next
    }

    /// New set with updated stakes and recomputed weights
    ///
    /// No-op on a fixed council.
    pub fn with_stakes(&self, stakes: &BTreeMap<Address, u64>) -> Self {
        let mut next = self.clone();
        if let CouncilKind::Weighted(weighted) = &mut next.kind {
            weighted.stakes = next
                .council
                .iter()
                .map(|addr| (*addr, stakes.get(addr).copied().unwrap_or(0)))
                .collect();
            weighted.weights = calc_weights(&next.council, &weighted.stakes);
        }
        next
    }

    /// New set with the given members demoted; unknown addresses are ignored
    pub fn with_demoted(&self, demoted: &BTreeSet<Address>) -> Self {
        let mut next = self.clone();
        next.demoted = demoted
            .iter()
            .filter(|addr| next.is_council_member(addr))
            .copied()
            .collect();
        next
    }

    /// New set with a freshly shuffled weighted proposer permutation
    ///
    /// No-op on a fixed council.
    pub fn with_refreshed_proposers(&self, seed: Hash, block: u64) -> Self {
        let mut next = self.clone();
        let qualified = next.qualified();
        if let CouncilKind::Weighted(weighted) = &mut next.kind {
            weighted.proposers = build_proposers(&qualified, &weighted.weights, seed);
            weighted.proposers_block = block;
        }
        next
    }
}

//! Per-round committee state

use crate::error::Result;
use crate::quorum::{calc_fault_tolerance, calc_quorum_size};
use crate::selection::{select_committee, select_proposer, RoundContext};
use crate::validator_set::ValidatorSet;
use ibft_core::{Address, View};

/// Committee, proposer and thresholds for one `(height, round)`
///
/// Built fresh for every round and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundCommitteeState {
    view: View,
    committee: Vec<Address>,
    non_committee: Vec<Address>,
    proposer: Address,
    committee_size: u64,
    quorum: usize,
    f: usize,
}

impl RoundCommitteeState {
    /// Derive the state for `ctx` from a validator set
    pub fn new(set: &ValidatorSet, ctx: &RoundContext<'_>) -> Result<Self> {
        let proposer = select_proposer(set, ctx)?;
        let committee = select_committee(set, ctx, proposer)?;
        let non_committee = set
            .qualified()
            .into_iter()
            .filter(|addr| !committee.contains(addr))
            .collect();

        let qualified_len = set.qualified_len();
        Ok(Self {
            view: View::new(ctx.height, ctx.round),
            committee,
            non_committee,
            proposer,
            committee_size: set.committee_size(),
            quorum: calc_quorum_size(qualified_len, set.committee_size()),
            f: calc_fault_tolerance(qualified_len, set.committee_size()),
        })
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn committee(&self) -> &[Address] {
        &self.committee
    }

    /// Qualified validators outside the committee
    pub fn non_committee(&self) -> &[Address] {
        &self.non_committee
    }

    pub fn proposer(&self) -> Address {
        self.proposer
    }

    pub fn is_proposer(&self, address: &Address) -> bool {
        self.proposer == *address
    }

    pub fn is_committee_member(&self, address: &Address) -> bool {
        self.committee.contains(address)
    }

    pub fn is_qualified(&self, address: &Address) -> bool {
        self.is_committee_member(address) || self.non_committee.contains(address)
    }

    pub fn committee_size(&self) -> u64 {
        self.committee_size
    }

    /// Matching messages needed to advance a phase (the quorum)
    pub fn required_message_count(&self) -> usize {
        self.quorum
    }

    /// Tolerated Byzantine members
    pub fn f(&self) -> usize {
        self.f
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibft_core::{Hash, ProposerPolicy};

    #[test]
    fn test_thresholds_follow_qualified_set() {
        let members: Vec<Address> = (1..=7u8).map(|i| Address::new([i; 20])).collect();
        let set = ValidatorSet::new(members.clone(), ProposerPolicy::RoundRobin, 21);
        let ctx = RoundContext::new(1, 0, Hash::ZERO, Address::ZERO);
        let state = RoundCommitteeState::new(&set, &ctx).unwrap();

        assert_eq!(state.view(), View::new(1, 0));
        assert_eq!(state.required_message_count(), 5);
        assert_eq!(state.f(), 2);
        assert_eq!(state.committee().len(), 7);
        assert!(state.non_committee().is_empty());
        assert!(state.is_proposer(&members[0]));
    }

    #[test]
    fn test_non_committee_is_the_complement() {
        let members: Vec<Address> = (1..=9u8).map(|i| Address::new([i; 20])).collect();
        let set = ValidatorSet::new(members, ProposerPolicy::RoundRobin, 4);
        let ctx = RoundContext::new(4, 1, Hash::digest(b"prev"), Address::ZERO);
        let state = RoundCommitteeState::new(&set, &ctx).unwrap();

        assert_eq!(state.committee().len(), 4);
        assert_eq!(state.non_committee().len(), 5);
        assert!(state.is_committee_member(&state.proposer()));
        for addr in state.non_committee() {
            assert!(!state.is_committee_member(addr));
            assert!(state.is_qualified(addr));
        }
    }
}

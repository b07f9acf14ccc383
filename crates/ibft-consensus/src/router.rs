//! Gossip target selection for prepare and commit messages

use ibft_committee::RoundCommitteeState;
use ibft_core::Address;
use std::collections::BTreeSet;

/// Peers that should receive our prepare or commit
///
/// The current committee plus the next round's committee, so nodes that may
/// become voters after a round change already hold the messages. Empty when
/// we are not in the current committee.
pub fn gossip_targets(
    me: &Address,
    current: &RoundCommitteeState,
    next: Option<&RoundCommitteeState>,
) -> BTreeSet<Address> {
    if !current.is_committee_member(me) {
        return BTreeSet::new();
    }
    let mut targets: BTreeSet<Address> = current.committee().iter().copied().collect();
    if let Some(next) = next {
        targets.extend(next.committee().iter().copied());
    }
    targets.remove(me);
    targets
}

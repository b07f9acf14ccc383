//! State of the current round

use crate::message::{Preprepare, Subject};
use crate::message_set::MessageSet;
use ibft_core::{Address, Block, Hash, View};
use std::collections::BTreeSet;

/// Progress of one height, totally ordered
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    AcceptRequest,
    Preprepared,
    Prepared,
    Committed,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::AcceptRequest => "AcceptRequest",
            State::Preprepared => "Preprepared",
            State::Prepared => "Prepared",
            State::Committed => "Committed",
        };
        f.write_str(name)
    }
}

/// Messages and locks collected in the current round
#[derive(Clone, Debug, Default)]
pub struct RoundState {
    view: View,
    prev_hash: Hash,
    preprepare: Option<Preprepare>,
    prepares: MessageSet,
    commits: MessageSet,
    locked_hash: Option<Hash>,
    pending_request: Option<Block>,
}

impl RoundState {
    /// Fresh round; `committee` are the addresses allowed to prepare and commit
    pub fn new(view: View, prev_hash: Hash, committee: &[Address]) -> Self {
        Self {
            view,
            prev_hash,
            preprepare: None,
            prepares: MessageSet::new(view, committee.iter().copied()),
            commits: MessageSet::new(view, committee.iter().copied()),
            locked_hash: None,
            pending_request: None,
        }
    }

    /// Next round at the same height, carrying the lock and the pending request
    ///
    /// A locked round keeps its preprepare so the locked proposal can be
    /// proposed again.
    pub fn next(&self, view: View, committee: &[Address]) -> Self {
        let mut next = Self::new(view, self.prev_hash, committee);
        next.pending_request = self.pending_request.clone();
        if self.locked_hash.is_some() {
            next.locked_hash = self.locked_hash;
            next.preprepare = self.preprepare.clone();
        }
        next
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn sequence(&self) -> u64 {
        self.view.sequence
    }

    pub fn round(&self) -> u64 {
        self.view.round
    }

    /// Hash of the block this height builds on
    pub fn prev_hash(&self) -> Hash {
        self.prev_hash
    }

    pub fn preprepare(&self) -> Option<&Preprepare> {
        self.preprepare.as_ref()
    }

    pub fn set_preprepare(&mut self, preprepare: Preprepare) {
        self.preprepare = Some(preprepare);
    }

    pub fn proposal(&self) -> Option<&Block> {
        self.preprepare.as_ref().map(|p| &p.proposal)
    }

    /// Subject of the accepted proposal in this round
    pub fn subject(&self) -> Option<Subject> {
        self.preprepare.as_ref().map(|p| Subject {
            view: self.view,
            digest: p.proposal.hash(),
            prev_hash: p.proposal.parent_hash(),
        })
    }

    pub fn prepares(&self) -> &MessageSet {
        &self.prepares
    }

    pub fn prepares_mut(&mut self) -> &mut MessageSet {
        &mut self.prepares
    }

    pub fn commits(&self) -> &MessageSet {
        &self.commits
    }

    pub fn commits_mut(&mut self) -> &mut MessageSet {
        &mut self.commits
    }

    /// Distinct senders of prepares or commits
    pub fn prepare_or_commit_size(&self) -> usize {
        let senders: BTreeSet<&Address> = self.prepares.senders().chain(self.commits.senders()).collect();
        senders.len()
    }

    /// Lock onto the accepted proposal
    pub fn lock_hash(&mut self) {
        if let Some(preprepare) = &self.preprepare {
            self.locked_hash = Some(preprepare.proposal.hash());
        }
    }

    pub fn unlock_hash(&mut self) {
        self.locked_hash = None;
    }

    pub fn locked_hash(&self) -> Option<Hash> {
        self.locked_hash
    }

    pub fn is_hash_locked(&self) -> bool {
        self.locked_hash.is_some()
    }

    pub fn pending_request(&self) -> Option<&Block> {
        self.pending_request.as_ref()
    }

    pub fn set_pending_request(&mut self, request: Block) {
        self.pending_request = Some(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageCode};
    use ibft_core::BlockHeader;

    fn committee() -> Vec<Address> {
        (1..=4u8).map(|i| Address::new([i; 20])).collect()
    }

    fn proposal() -> Block {
        let header = BlockHeader {
            number: 1,
            ..BlockHeader::default()
        };
        Block::new(header, vec![])
    }

    #[test]
    fn test_state_order() {
        assert!(State::AcceptRequest < State::Preprepared);
        assert!(State::Prepared < State::Committed);
    }

    #[test]
    fn test_lock_survives_round_change() {
        let mut state = RoundState::new(View::new(1, 0), Hash::ZERO, &committee());
        state.lock_hash();
        assert!(!state.is_hash_locked());

        state.set_preprepare(Preprepare {
            view: View::new(1, 0),
            proposal: proposal(),
        });
        state.lock_hash();
        let next = state.next(View::new(1, 1), &committee());

        assert_eq!(next.locked_hash(), Some(proposal().hash()));
        assert!(next.preprepare().is_some());
        assert_eq!(next.prepares().size(), 0);
    }

    #[test]
    fn test_unlocked_round_change_drops_preprepare() {
        let mut state = RoundState::new(View::new(1, 0), Hash::ZERO, &committee());
        state.set_preprepare(Preprepare {
            view: View::new(1, 0),
            proposal: proposal(),
        });
        state.set_pending_request(proposal());

        let next = state.next(View::new(1, 1), &committee());
        assert!(next.preprepare().is_none());
        assert!(next.pending_request().is_some());
    }

    #[test]
    fn test_prepare_or_commit_counts_distinct_senders() {
        let mut state = RoundState::new(View::new(1, 0), Hash::ZERO, &committee());
        let from = |i: u8, code| Message::new(code, vec![], Address::new([i; 20]));

        state.prepares_mut().add(from(1, MessageCode::Prepare)).unwrap();
        state.prepares_mut().add(from(2, MessageCode::Prepare)).unwrap();
        state.commits_mut().add(from(2, MessageCode::Commit)).unwrap();
        state.commits_mut().add(from(3, MessageCode::Commit)).unwrap();

        assert_eq!(state.prepare_or_commit_size(), 3);
    }
}

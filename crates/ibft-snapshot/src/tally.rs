//! Governance vote tally
//!
//! Each voter holds at most one active vote per [`VoteKey`]; a new vote on the
//! same key replaces the old one. How a vote passes depends on the
//! governance mode:
//!
//! | mode     | passes when                                   |
//! |----------|-----------------------------------------------|
//! | `None`   | immediately                                   |
//! | `Single` | immediately, if cast by the governing node    |
//! | `Ballot` | more than half of the council voted for it    |

use ibft_core::{Address, GovernanceMode, GovernanceVote, VoteAction, VoteKey};
use serde::{Deserialize, Serialize};

/// Votes for one concrete action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    pub action: VoteAction,
    pub votes: u64,
}

/// Outstanding votes and per-action counts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    votes: Vec<GovernanceVote>,
    tally: Vec<TallyEntry>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding ballot votes
    pub fn votes(&self) -> &[GovernanceVote] {
        &self.votes
    }

    /// Per-action counts
    pub fn tally(&self) -> &[TallyEntry] {
        &self.tally
    }

    pub fn count(&self, action: &VoteAction) -> u64 {
        self.tally
            .iter()
            .find(|entry| entry.action == *action)
            .map_or(0, |entry| entry.votes)
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Drop every vote (epoch boundary)
    pub fn clear(&mut self) {
        self.votes.clear();
        self.tally.clear();
    }

    /// Count a vote; returns the action if it passed
    pub fn cast(
        &mut self,
        vote: &GovernanceVote,
        council_size: usize,
        mode: GovernanceMode,
        governing_node: Option<Address>,
    ) -> Option<VoteAction> {
        match mode {
            GovernanceMode::None => Some(vote.action.clone()),
            GovernanceMode::Single => {
                (Some(vote.voter) == governing_node).then(|| vote.action.clone())
            }
            GovernanceMode::Ballot => self.cast_ballot(vote, council_size),
        }
    }

    fn cast_ballot(&mut self, vote: &GovernanceVote, council_size: usize) -> Option<VoteAction> {
        let key = vote.action.key();
        self.withdraw(&vote.voter, key);

        self.votes.push(vote.clone());
        match self.tally.iter_mut().find(|entry| entry.action == vote.action) {
            Some(entry) => entry.votes += 1,
            None => self.tally.push(TallyEntry {
                action: vote.action.clone(),
                votes: 1,
            }),
        }

        if self.count(&vote.action) * 2 > council_size as u64 {
            self.discard_key(key);
            return Some(vote.action.clone());
        }
        None
    }

    fn withdraw(&mut self, voter: &Address, key: VoteKey) {
        let Some(pos) = self
            .votes
            .iter()
            .position(|v| v.voter == *voter && v.action.key() == key)
        else {
            return;
        };
        let previous = self.votes.remove(pos);
        self.decrement(&previous.action);
    }

    fn decrement(&mut self, action: &VoteAction) {
        if let Some(entry) = self.tally.iter_mut().find(|entry| entry.action == *action) {
            entry.votes = entry.votes.saturating_sub(1);
        }
        self.tally.retain(|entry| entry.votes > 0);
    }

    fn discard_key(&mut self, key: VoteKey) {
        self.votes.retain(|v| v.action.key() != key);
        self.tally.retain(|entry| entry.action.key() != key);
    }

    /// Remove all votes cast by a removed validator
    pub fn forget_voter(&mut self, voter: &Address) {
        let withdrawn: Vec<VoteAction> = self
            .votes
            .iter()
            .filter(|v| v.voter == *voter)
            .map(|v| v.action.clone())
            .collect();
        self.votes.retain(|v| v.voter != *voter);
        for action in withdrawn {
            self.decrement(&action);
        }
    }
}

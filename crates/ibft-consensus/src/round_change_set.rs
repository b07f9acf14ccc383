//! Round-change accumulators, one message set per target round

use crate::error::Result;
use crate::message::Message;
use crate::message_set::MessageSet;
use ibft_core::{Address, View};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct RoundChangeSet {
    sequence: u64,
    members: Vec<Address>,
    rounds: BTreeMap<u64, MessageSet>,
}

impl RoundChangeSet {
    /// Empty set for `sequence`, accepting messages from `members`
    pub fn new(sequence: u64, members: Vec<Address>) -> Self {
        Self {
            sequence,
            members,
            rounds: BTreeMap::new(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Record a round change for `round`; returns the count for that round
    pub fn add(&mut self, round: u64, msg: Message) -> Result<usize> {
        let view = View::new(self.sequence, round);
        let members = &self.members;
        let set = self
            .rounds
            .entry(round)
            .or_insert_with(|| MessageSet::new(view, members.iter().copied()));
        set.add(msg)?;
        Ok(set.size())
    }

    pub fn count(&self, round: u64) -> usize {
        self.rounds.get(&round).map_or(0, MessageSet::size)
    }

    /// Drop rounds below `round` and empty rounds
    pub fn clear(&mut self, round: u64) {
        self.rounds.retain(|r, set| *r >= round && set.size() > 0);
    }

    /// Highest round with at least `threshold` messages
    pub fn max_round(&self, threshold: usize) -> Option<u64> {
        self.rounds
            .iter()
            .rev()
            .find(|(_, set)| set.size() >= threshold)
            .map(|(round, _)| *round)
    }
}

//! Per-sender message accumulators

use crate::error::{ConsensusError, Result};
use crate::message::Message;
use ibft_core::{Address, View};
use std::collections::{BTreeMap, BTreeSet};

/// One message per sender, restricted to a member list
///
/// A later message from the same sender replaces the earlier one.
#[derive(Clone, Debug, Default)]
pub struct MessageSet {
    view: View,
    members: BTreeSet<Address>,
    messages: BTreeMap<Address, Message>,
}

impl MessageSet {
    pub fn new(view: View, members: impl IntoIterator<Item = Address>) -> Self {
        Self {
            view,
            members: members.into_iter().collect(),
            messages: BTreeMap::new(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Record a message; rejects senders outside the member list
    pub fn add(&mut self, msg: Message) -> Result<()> {
        if !self.members.contains(&msg.address) {
            return Err(ConsensusError::Unauthorized(msg.address));
        }
        self.messages.insert(msg.address, msg);
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Option<&Message> {
        self.messages.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.messages.contains_key(address)
    }

    /// Messages ordered by sender
    pub fn values(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn senders(&self) -> impl Iterator<Item = &Address> {
        self.messages.keys()
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }
}

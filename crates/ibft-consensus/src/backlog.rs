//! Bounded store of messages that arrived ahead of the local view
//!
//! Entries are ordered by sequence, then round, then code priority. Round
//! changes sort ahead of every other message of their sequence so a node
//! that fell behind joins the newest round before it looks at proposals.

use crate::message::{Message, MessageCode};
use ibft_core::View;
use std::collections::BTreeMap;
use tracing::trace;

/// What to do with a backlogged message during replay
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Replay {
    /// Handle it now
    Ready,
    /// Still ahead of us
    Keep,
    /// Behind us; discard
    Drop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct BacklogKey {
    sequence: u64,
    round: u64,
    priority: u8,
    arrival: u64,
}

impl BacklogKey {
    fn new(code: MessageCode, view: View, arrival: u64) -> Self {
        let round = match code {
            MessageCode::RoundChange => 0,
            _ => view.round,
        };
        Self {
            sequence: view.sequence,
            round,
            priority: code.priority(),
            arrival,
        }
    }
}

#[derive(Debug)]
pub struct Backlog {
    capacity: usize,
    next_arrival: u64,
    entries: BTreeMap<BacklogKey, (View, Message)>,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_arrival: 0,
            entries: BTreeMap::new(),
        }
    }

    /// Store a message for `view`
    ///
    /// When full, the entry farthest in the future is evicted; returns false
    /// if that entry is the new message itself.
    pub fn push(&mut self, view: View, msg: Message) -> bool {
        let key = BacklogKey::new(msg.code, view, self.next_arrival);
        self.next_arrival += 1;

        if self.entries.len() >= self.capacity {
            let Some((&last, _)) = self.entries.last_key_value() else {
                return false;
            };
            if key > last {
                trace!(sequence = view.sequence, round = view.round, "Backlog full, dropping message");
                return false;
            }
            self.entries.remove(&last);
        }
        self.entries.insert(key, (view, msg));
        true
    }

    /// Take every entry `classify` marks ready, discarding those it marks old
    pub fn replay<F>(&mut self, mut classify: F) -> Vec<Message>
    where
        F: FnMut(MessageCode, View) -> Replay,
    {
        let mut ready = Vec::new();
        let mut dropped = 0usize;
        self.entries.retain(|_, (view, msg)| match classify(msg.code, *view) {
            Replay::Keep => true,
            Replay::Drop => {
                dropped += 1;
                false
            }
            Replay::Ready => {
                let placeholder = Message::new(msg.code, Vec::new(), msg.address);
                ready.push(std::mem::replace(msg, placeholder));
                false
            }
        });
        if dropped > 0 || !ready.is_empty() {
            trace!(ready = ready.len(), dropped, kept = self.entries.len(), "Backlog replayed");
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

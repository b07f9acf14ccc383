//! Message bus connecting in-process nodes
//!
//! Every node registers an unbounded inbox. Delivery passes through a
//! [`LinkFilter`] so tests and the simulator can isolate nodes, split the
//! network into partitions or drop a share of all traffic.

use ibft_core::{Address, Block};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

/// What travels between nodes
#[derive(Clone, Debug)]
pub enum Envelope {
    /// Encoded consensus message
    Consensus { from: Address, payload: Vec<u8> },

    /// Block committed by the sender
    Block { from: Address, block: Block },

    /// Ask the receiver for its blocks starting at `next`
    SyncRequest { from: Address, next: u64 },
}

impl Envelope {
    pub fn sender(&self) -> Address {
        match self {
            Envelope::Consensus { from, .. }
            | Envelope::Block { from, .. }
            | Envelope::SyncRequest { from, .. } => *from,
        }
    }
}

/// Which links currently carry traffic
#[derive(Clone, Debug, Default)]
pub struct LinkFilter {
    /// Nodes cut off from everyone
    pub isolated: BTreeSet<Address>,

    /// When non-empty, only nodes in the same group can talk
    pub partitions: Vec<BTreeSet<Address>>,

    /// Probability of dropping any single delivery
    pub drop_rate: f64,
}

impl LinkFilter {
    /// Whether a message from `from` may reach `to`, ignoring random drops
    pub fn connects(&self, from: &Address, to: &Address) -> bool {
        if self.isolated.contains(from) || self.isolated.contains(to) {
            return false;
        }
        if self.partitions.is_empty() {
            return true;
        }
        self.partitions
            .iter()
            .any(|group| group.contains(from) && group.contains(to))
    }
}

/// Delivery counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Default)]
pub struct LocalBus {
    peers: RwLock<BTreeMap<Address, mpsc::UnboundedSender<Envelope>>>,
    filter: RwLock<LinkFilter>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the inbox of `address`, replacing any previous one
    pub fn register(&self, address: Address) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().insert(address, tx);
        rx
    }

    pub fn unregister(&self, address: &Address) {
        self.peers.write().remove(address);
    }

    pub fn peers(&self) -> Vec<Address> {
        self.peers.read().keys().copied().collect()
    }

    /// Send to every registered peer except the sender
    pub fn send_all(&self, envelope: Envelope) {
        let from = envelope.sender();
        let targets: Vec<Address> = self
            .peers
            .read()
            .keys()
            .filter(|peer| **peer != from)
            .copied()
            .collect();
        self.send_to(targets.iter(), envelope);
    }

    /// Send to `targets`, skipping the sender itself
    pub fn send_to<'a>(&self, targets: impl IntoIterator<Item = &'a Address>, envelope: Envelope) {
        let from = envelope.sender();
        let filter = self.filter.read().clone();
        let peers = self.peers.read();
        let mut rng = rand::thread_rng();

        for target in targets {
            if *target == from {
                continue;
            }
            let Some(inbox) = peers.get(target) else {
                continue;
            };
            let dropped = !filter.connects(&from, target)
                || (filter.drop_rate > 0.0 && rng.gen_bool(filter.drop_rate.min(1.0)));
            if dropped || inbox.send(envelope.clone()).is_err() {
                trace!(%from, to = %target, "Envelope dropped");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            } else {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Cut `address` off from every other node
    pub fn isolate(&self, address: Address) {
        self.filter.write().isolated.insert(address);
    }

    pub fn reconnect(&self, address: &Address) {
        self.filter.write().isolated.remove(address);
    }

    /// Only deliver within each group
    pub fn partition(&self, groups: Vec<BTreeSet<Address>>) {
        self.filter.write().partitions = groups;
    }

    /// Drop every partition and isolation
    pub fn heal(&self) {
        let mut filter = self.filter.write();
        filter.isolated.clear();
        filter.partitions.clear();
    }

    pub fn set_drop_rate(&self, rate: f64) {
        self.filter.write().drop_rate = rate.clamp(0.0, 1.0);
    }

    pub fn filter(&self) -> LinkFilter {
        self.filter.read().clone()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

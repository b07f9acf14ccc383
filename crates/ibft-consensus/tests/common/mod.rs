//! In-memory backend and a synchronous multi-node harness

#![allow(dead_code)]

use ibft_committee::{RoundCommitteeState, RoundContext, ValidatorSet};
use ibft_consensus::prelude::*;
use ibft_core::{Address, Block, BlockHeader, Hash, HeaderExtra, ProposerPolicy, View};
use ibft_crypto::{KeyPair, SignerCache};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

pub fn key(i: usize) -> KeyPair {
    KeyPair::from_seed(format!("validator-{i}").as_bytes())
}

pub fn outsider() -> KeyPair {
    KeyPair::from_seed(b"outsider")
}

pub fn genesis(validators: Vec<Address>) -> Block {
    Block::new(BlockHeader::genesis(validators, 0), vec![])
}

/// Sealed child of `parent`
pub fn propose(parent: &Block, proposer: &KeyPair, tag: &[u8]) -> Block {
    let body = vec![tag.to_vec()];
    let mut header = BlockHeader {
        parent_hash: parent.hash(),
        number: parent.number() + 1,
        timestamp: parent.header.timestamp + 1,
        payload_root: Block::compute_payload_root(&body),
        mix_hash: None,
        extra: HeaderExtra::default(),
    };
    header.extra.seal = proposer.sign(header.seal_hash().as_bytes());
    Block::new(header, body)
}

/// Sign a message envelope and encode it
pub fn signed(key: &KeyPair, mut msg: Message) -> Vec<u8> {
    msg.signature = key.sign(&msg.signing_bytes());
    msg.to_bytes().unwrap()
}

#[derive(Clone, Debug)]
pub enum Route {
    All,
    Targets(BTreeSet<Address>),
}

#[derive(Clone, Debug)]
pub struct Outgoing {
    pub route: Route,
    pub payload: Vec<u8>,
}

pub struct TestBackend {
    key: KeyPair,
    signers: SignerCache,
    validators: ValidatorSet,
    chain: Mutex<Vec<Block>>,
    outbox: Mutex<Vec<Outgoing>>,
    future_delay: Mutex<Option<Duration>>,
    engine: Mutex<Option<EngineHandle>>,
}

impl TestBackend {
    pub fn new(key: KeyPair, validators: Vec<Address>, committee_size: u64) -> Self {
        let set = ValidatorSet::new(validators.clone(), ProposerPolicy::RoundRobin, committee_size);
        Self {
            key,
            signers: SignerCache::new(256),
            validators: set,
            chain: Mutex::new(vec![genesis(validators)]),
            outbox: Mutex::new(Vec::new()),
            future_delay: Mutex::new(None),
            engine: Mutex::new(None),
        }
    }

    /// Route `final_committed` to a running engine after each commit
    pub fn attach(&self, handle: EngineHandle) {
        *self.engine.lock() = Some(handle);
    }

    /// Next verification reports a future block
    pub fn set_future_delay(&self, delay: Duration) {
        *self.future_delay.lock() = Some(delay);
    }

    pub fn chain(&self) -> Vec<Block> {
        self.chain.lock().clone()
    }

    pub fn head(&self) -> Block {
        self.chain.lock().last().cloned().unwrap_or_default()
    }

    pub fn take_outbox(&self) -> Vec<Outgoing> {
        std::mem::take(&mut *self.outbox.lock())
    }

    fn proposer_of(&self, block: &Block) -> Address {
        if block.header.is_genesis() {
            return Address::ZERO;
        }
        self.signers
            .recover(block.header.seal_hash().as_bytes(), &block.header.extra.seal)
            .unwrap_or(Address::ZERO)
    }

    fn send(&self, route: Route, payload: Vec<u8>) {
        self.outbox.lock().push(Outgoing { route, payload });
    }
}

impl Backend for TestBackend {
    fn address(&self) -> Address {
        self.key.address()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(data))
    }

    fn check_signature(&self, data: &[u8], address: Address, signature: &[u8]) -> Result<()> {
        Ok(self.signers.verify(data, address, signature)?)
    }

    fn recover_signer(&self, data: &[u8], signature: &[u8]) -> Result<Address> {
        Ok(self.signers.recover(data, signature)?)
    }

    fn broadcast(&self, _prev_hash: Hash, payload: Vec<u8>) {
        self.send(Route::All, payload);
    }

    fn gossip(&self, payload: Vec<u8>) {
        self.send(Route::All, payload);
    }

    fn gossip_sub_peer(&self, _prev_hash: Hash, payload: Vec<u8>, targets: &BTreeSet<Address>) {
        self.send(Route::Targets(targets.clone()), payload);
    }

    fn verify(&self, proposal: &Block) -> std::result::Result<(), VerifyError> {
        if let Some(delay) = self.future_delay.lock().take() {
            return Err(VerifyError::FutureBlock(delay));
        }
        let chain = self.chain.lock();
        let parent = proposal
            .number()
            .checked_sub(1)
            .and_then(|n| chain.get(n as usize));
        match parent {
            Some(parent) if parent.hash() == proposal.parent_hash() => Ok(()),
            _ => Err(VerifyError::Invalid("unknown parent".to_string())),
        }
    }

    fn last_proposal(&self) -> (Block, Address) {
        let head = self.head();
        let proposer = self.proposer_of(&head);
        (head, proposer)
    }

    fn has_proposal(&self, hash: &Hash, number: u64) -> bool {
        self.chain
            .lock()
            .get(number as usize)
            .is_some_and(|block| block.hash() == *hash)
    }

    fn commit(&self, proposal: &Block, round: u64, seals: Vec<Vec<u8>>) -> Result<()> {
        let mut block = proposal.clone();
        block.header.extra.committed_seals = seals;
        block.header.extra.round = round;
        {
            let mut chain = self.chain.lock();
            if block.number() != chain.len() as u64 {
                return Err(ConsensusError::Commit(format!("unexpected height {}", block.number())));
            }
            chain.push(block);
        }
        if let Some(handle) = self.engine.lock().as_ref() {
            handle.final_committed()?;
        }
        Ok(())
    }

    fn committee_state_by_round(&self, height: u64, round: u64) -> Result<RoundCommitteeState> {
        let parent = {
            let chain = self.chain.lock();
            height
                .checked_sub(1)
                .and_then(|n| chain.get(n as usize).cloned())
                .ok_or_else(|| ConsensusError::Committee(format!("no parent for height {height}")))?
        };
        let ctx = RoundContext::new(height, round, parent.hash(), self.proposer_of(&parent));
        Ok(RoundCommitteeState::new(&self.validators, &ctx)?)
    }
}

pub struct TestNode {
    pub key: KeyPair,
    pub backend: Arc<TestBackend>,
    pub core: Core,
    pub timers: HashMap<TimerId, Event>,
    pub notifications: Vec<EngineNotification>,
    pub halted: bool,
    internal: VecDeque<Event>,
    inbox: VecDeque<Event>,
}

impl TestNode {
    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::SetTimer { id, event, .. } => {
                    self.timers.insert(id, event);
                }
                Action::CancelTimer { id } => {
                    self.timers.remove(&id);
                }
                Action::EnqueueInternal { event } => self.internal.push_back(event),
                Action::Notify(notification) => {
                    // the host finishes writing the block right away
                    if matches!(notification, EngineNotification::Committed { .. }) {
                        self.internal.push_back(Event::FinalCommitted);
                    }
                    self.notifications.push(notification);
                }
            }
        }
    }

    /// Handle one event, internal ones first
    fn step(&mut self) -> bool {
        let Some(event) = self.internal.pop_front().or_else(|| self.inbox.pop_front()) else {
            return false;
        };
        let actions = self.core.handle_event(event).expect("fatal consensus error");
        self.apply(actions);
        true
    }

    pub fn committed_rounds(&self) -> Vec<u64> {
        self.notifications
            .iter()
            .filter_map(|n| match n {
                EngineNotification::Committed { round, .. } => Some(*round),
                _ => None,
            })
            .collect()
    }
}

/// Synchronous network of cores; timers fire only when a test says so
pub struct Harness {
    pub nodes: Vec<TestNode>,
    /// Every payload that left a node, in send order
    pub log: Vec<(usize, Vec<u8>)>,
}

impl Harness {
    pub fn new(n: usize, committee_size: u64) -> Self {
        let validators: Vec<Address> = (0..n).map(|i| key(i).address()).collect();
        let config = ConsensusConfig::default();
        let nodes = (0..n)
            .map(|i| {
                let backend = Arc::new(TestBackend::new(key(i), validators.clone(), committee_size));
                let core = Core::new(backend.clone(), config.clone());
                TestNode {
                    key: key(i),
                    backend,
                    core,
                    timers: HashMap::new(),
                    notifications: Vec::new(),
                    halted: false,
                    internal: VecDeque::new(),
                    inbox: VecDeque::new(),
                }
            })
            .collect();
        Self {
            nodes,
            log: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        for node in &mut self.nodes {
            let actions = node.core.start().expect("core start");
            node.apply(actions);
        }
    }

    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.nodes.iter().position(|n| n.key.address() == *address)
    }

    /// Proposer of the current round as seen by `node`
    pub fn proposer(&self, node: usize) -> usize {
        let proposer = self.nodes[node].core.committee().expect("started").proposer();
        self.index_of(&proposer).expect("proposer is a validator")
    }

    /// Block for the next height built by `proposer`
    pub fn propose_next(&self, proposer: usize, tag: &[u8]) -> Block {
        let parent = self.nodes[proposer].backend.head();
        propose(&parent, &self.nodes[proposer].key, tag)
    }

    pub fn inject(&mut self, node: usize, event: Event) {
        self.nodes[node].inbox.push_back(event);
    }

    pub fn deliver(&mut self, node: usize, payload: Vec<u8>) {
        self.inject(node, Event::Message(payload));
    }

    pub fn fire_timer(&mut self, node: usize, id: TimerId) -> bool {
        match self.nodes[node].timers.remove(&id) {
            Some(event) => {
                self.inject(node, event);
                true
            }
            None => false,
        }
    }

    pub fn halt(&mut self, node: usize) {
        self.nodes[node].halted = true;
    }

    /// Run one node until its queues are empty, without routing
    pub fn settle(&mut self, node: usize) {
        while self.nodes[node].step() {}
    }

    pub fn pump(&mut self) {
        self.pump_filtered(|_, _, _| true);
    }

    /// Run until quiet; `allow(from, to, msg)` decides each delivery
    pub fn pump_filtered<F>(&mut self, mut allow: F)
    where
        F: FnMut(usize, usize, &Message) -> bool,
    {
        loop {
            let mut progressed = false;
            for node in self.nodes.iter_mut().filter(|n| !n.halted) {
                progressed |= node.step();
            }
            progressed |= self.route(&mut allow);
            if !progressed {
                break;
            }
        }
    }

    fn route<F>(&mut self, allow: &mut F) -> bool
    where
        F: FnMut(usize, usize, &Message) -> bool,
    {
        let mut deliveries = Vec::new();
        for (from, node) in self.nodes.iter().enumerate() {
            for out in node.backend.take_outbox() {
                self.log.push((from, out.payload.clone()));
                let Ok(msg) = Message::from_bytes(&out.payload) else {
                    continue;
                };
                for (to, peer) in self.nodes.iter().enumerate() {
                    let addressed = match &out.route {
                        Route::All => true,
                        Route::Targets(targets) => targets.contains(&peer.key.address()),
                    };
                    if to != from && addressed && !peer.halted && allow(from, to, &msg) {
                        deliveries.push((to, out.payload.clone()));
                    }
                }
            }
        }
        let progressed = !deliveries.is_empty();
        for (to, payload) in deliveries {
            self.deliver(to, payload);
        }
        progressed
    }

    /// First logged payload of the given kind
    pub fn find_logged(&self, code: MessageCode) -> Option<(usize, Vec<u8>)> {
        self.log
            .iter()
            .find(|(_, payload)| Message::from_bytes(payload).is_ok_and(|m| m.code == code))
            .cloned()
    }

    pub fn views(&self) -> Vec<View> {
        self.nodes.iter().map(|n| n.core.view()).collect()
    }
}

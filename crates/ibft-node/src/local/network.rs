//! In-process validator network
//!
//! Each [`LocalNode`] owns its chain, snapshot manager and engine, and runs
//! two tasks next to the engine: an inbox pump feeding bus traffic into the
//! engine, and a producer that builds a block whenever the node becomes the
//! proposer of a new round. Nodes that fall behind catch up from the blocks
//! their peers announce.

use super::backend::LocalBackend;
use super::bus::{Envelope, LocalBus};
use super::chain::LocalChain;
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::metrics::ConsensusMetrics;
use ibft_consensus::{Engine, EngineHandle, EngineNotification};
use ibft_core::{Address, Block, BlockHeader, View};
use ibft_crypto::{KeyPair, SignerCache};
use ibft_snapshot::{
    FileSnapshotStore, MemorySnapshotStore, SnapshotManager, SnapshotStore, StaticGovernance,
    StaticStaking,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Interval between height checks in [`LocalNetwork::wait_for_height`]
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Deterministic key of validator `index` for a chain
pub fn simulation_key(config: &NodeConfig, index: usize) -> KeyPair {
    let seed = config
        .node
        .key_seed
        .clone()
        .unwrap_or_else(|| config.node.chain_id.clone());
    KeyPair::from_seed(format!("{seed}/validator-{index}").as_bytes())
}

/// Genesis block for `validators`, stamped with the current time
pub fn genesis_block(validators: Vec<Address>) -> Block {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    Block::new(BlockHeader::genesis(validators, timestamp), Vec::new())
}

/// One validator with its engine and helper tasks
pub struct LocalNode {
    name: String,
    address: Address,
    backend: Arc<LocalBackend>,
    engine: Option<Engine>,
    handle: EngineHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalNode {
    /// Start a validator on `bus`; must run inside a tokio runtime
    pub fn start(
        name: String,
        key: KeyPair,
        genesis: &Block,
        config: &NodeConfig,
        bus: Arc<LocalBus>,
        metrics: Option<Arc<ConsensusMetrics>>,
    ) -> Result<Self> {
        let address = key.address();
        let chain = Arc::new(LocalChain::new(genesis.clone()));

        let store: Arc<dyn SnapshotStore> = match &config.snapshot.data_dir {
            Some(dir) => Arc::new(FileSnapshotStore::open(
                Path::new(dir).join(address.to_hex()),
            )?),
            None => Arc::new(MemorySnapshotStore::new()),
        };
        // equal stake for everyone; only the weighted policy reads it
        let stakes: BTreeMap<Address, u64> = genesis
            .header
            .extra
            .validators
            .iter()
            .map(|validator| (*validator, 1))
            .collect();
        let snapshots = SnapshotManager::new(
            chain.clone(),
            Arc::new(StaticGovernance::new(config.governance.clone())),
            Arc::new(StaticStaking::constant(stakes)),
            store,
            Arc::new(SignerCache::new(config.consensus.signer_cache_capacity)),
        )
        .with_checkpoint_interval(config.snapshot.checkpoint_interval)
        .with_recent_capacity(config.snapshot.memory_cache_capacity);

        let inbox = bus.register(address);
        let backend = Arc::new(LocalBackend::new(
            key,
            chain,
            Arc::new(snapshots),
            bus.clone(),
            config.governance.clone(),
        ));

        let engine = match Engine::start(backend.clone(), config.consensus.clone()) {
            Ok(engine) => engine,
            Err(err) => {
                bus.unregister(&address);
                return Err(err.into());
            }
        };
        let handle = engine.handle();
        backend.attach(handle.clone());

        let mut tasks = vec![
            tokio::spawn(pump(backend.clone(), handle.clone(), inbox)),
            tokio::spawn(produce(
                name.clone(),
                backend.clone(),
                handle.clone(),
                handle.subscribe(),
                Duration::from_millis(config.node.block_interval_ms),
            )),
        ];
        if let Some(metrics) = metrics {
            tasks.push(metrics.spawn_observer(address, handle.subscribe()));
        }

        info!(%name, %address, "Local node started");
        Ok(Self {
            name,
            address,
            backend,
            engine: Some(engine),
            handle,
            tasks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn backend(&self) -> &Arc<LocalBackend> {
        &self.backend
    }

    pub fn chain(&self) -> &Arc<LocalChain> {
        self.backend.chain()
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotification> {
        self.handle.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_some()
    }

    /// Stop the engine and its helper tasks
    pub async fn stop(&mut self) {
        self.backend.detach();
        if let Some(engine) = self.engine.take() {
            if let Err(err) = engine.shutdown().await {
                warn!(name = %self.name, %err, "Engine did not stop cleanly");
            }
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!(name = %self.name, "Local node stopped");
    }
}

/// Feed bus traffic into the engine until either side goes away
async fn pump(
    backend: Arc<LocalBackend>,
    handle: EngineHandle,
    mut inbox: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = inbox.recv().await {
        match envelope {
            Envelope::Consensus { payload, .. } => {
                if handle.deliver(payload).is_err() {
                    break;
                }
            }
            Envelope::Block { from, block } => match backend.import(block) {
                Ok(_) => {}
                Err(NodeError::NotNextBlock { number, head }) if number > head + 1 => {
                    backend.request_sync(from);
                }
                Err(err) => debug!(%from, %err, "Block import rejected"),
            },
            Envelope::SyncRequest { from, next } => backend.serve_sync(from, next),
        }
    }
}

/// Propose whenever this node leads a new round
async fn produce(
    name: String,
    backend: Arc<LocalBackend>,
    handle: EngineHandle,
    mut events: broadcast::Receiver<EngineNotification>,
    interval: Duration,
) {
    // the first round started before we subscribed
    let first = View::new(backend.chain().height() + 1, 0);
    tokio::time::sleep(interval).await;
    propose(&name, &backend, &handle, first);

    loop {
        match events.recv().await {
            Ok(EngineNotification::NewRound { view, round_change }) => {
                if !round_change {
                    tokio::time::sleep(interval).await;
                }
                propose(&name, &backend, &handle, view);
            }
            // peers stuck below our head only learn about it this way
            Ok(EngineNotification::Timeout { .. }) => backend.announce_head(),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!(%name, missed, "Producer lagged behind engine");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn propose(name: &str, backend: &LocalBackend, handle: &EngineHandle, view: View) {
    if backend.chain().height() + 1 != view.sequence {
        return;
    }
    match backend.is_proposer_at(view.sequence, view.round) {
        Ok(true) => {}
        Ok(false) => return,
        Err(err) => {
            warn!(%name, %view, %err, "Cannot derive proposer");
            return;
        }
    }

    let payload = format!("{name}/{}/{}", view.sequence, view.round).into_bytes();
    let block = backend.build_proposal(vec![payload]);
    debug!(%name, %view, hash = %block.hash(), "Requesting proposal");
    if let Err(err) = handle.request(block) {
        debug!(%name, %err, "Engine gone, proposal dropped");
    }
}

/// A set of validators sharing one bus
pub struct LocalNetwork {
    bus: Arc<LocalBus>,
    genesis: Block,
    nodes: Vec<LocalNode>,
    metrics: Option<Arc<ConsensusMetrics>>,
}

impl LocalNetwork {
    /// Start `validators` nodes with keys from [`simulation_key`]
    pub fn start(config: &NodeConfig, validators: usize) -> Result<Self> {
        let keys = (0..validators)
            .map(|index| simulation_key(config, index))
            .collect();
        Self::start_with_keys(config, keys, None)
    }

    /// Start one node per key, all of them in the genesis council
    pub fn start_with_keys(
        config: &NodeConfig,
        keys: Vec<KeyPair>,
        metrics: Option<Arc<ConsensusMetrics>>,
    ) -> Result<Self> {
        if keys.is_empty() {
            return Err(NodeError::InvalidConfig(
                "a network needs at least one validator".to_string(),
            ));
        }
        let bus = Arc::new(LocalBus::new());
        let genesis = genesis_block(keys.iter().map(KeyPair::address).collect());

        let mut nodes = Vec::with_capacity(keys.len());
        for (index, key) in keys.into_iter().enumerate() {
            let name = format!("{}-{index}", config.node.name);
            nodes.push(LocalNode::start(
                name,
                key,
                &genesis,
                config,
                bus.clone(),
                metrics.clone(),
            )?);
        }

        info!(validators = nodes.len(), genesis = %genesis.hash(), "Local network started");
        Ok(Self {
            bus,
            genesis,
            nodes,
            metrics,
        })
    }

    pub fn bus(&self) -> &Arc<LocalBus> {
        &self.bus
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    pub fn nodes(&self) -> &[LocalNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&LocalNode> {
        self.nodes.get(index)
    }

    pub fn metrics(&self) -> Option<&Arc<ConsensusMetrics>> {
        self.metrics.as_ref()
    }

    /// Head height of every node
    pub fn heights(&self) -> Vec<u64> {
        self.nodes.iter().map(|node| node.chain().height()).collect()
    }

    /// Stop node `index` and cut it off the bus
    pub async fn halt(&mut self, index: usize) {
        if let Some(node) = self.nodes.get_mut(index) {
            self.bus.isolate(node.address());
            node.stop().await;
        }
    }

    /// Wait until every running node reached `height`
    pub async fn wait_for_height(&self, height: u64, timeout: Duration) -> bool {
        let reached = async {
            loop {
                let done = self
                    .nodes
                    .iter()
                    .filter(|node| node.is_running())
                    .all(|node| node.chain().height() >= height);
                if done {
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, reached).await.is_ok()
    }

    /// Whether all nodes hold the same blocks up to the lowest head
    pub fn is_consistent(&self) -> bool {
        let lowest = self.heights().into_iter().min().unwrap_or(0);
        (1..=lowest).all(|number| {
            let mut hashes = self
                .nodes
                .iter()
                .filter_map(|node| node.chain().block(number).map(|block| block.hash()));
            match hashes.next() {
                Some(first) => hashes.all(|hash| hash == first),
                None => true,
            }
        })
    }

    pub async fn shutdown(mut self) {
        for node in &mut self.nodes {
            node.stop().await;
        }
        info!(stats = ?self.bus.stats(), "Local network stopped");
    }
}

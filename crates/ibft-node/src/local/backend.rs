//! [`Backend`] over a [`LocalChain`], a [`SnapshotManager`] and the bus

use super::bus::{Envelope, LocalBus};
use super::chain::LocalChain;
use crate::error::{NodeError, Result};
use ibft_committee::RoundCommitteeState;
use ibft_consensus::{Backend, ConsensusError, EngineHandle, VerifyError};
use ibft_core::{Address, Block, BlockHeader, GovernanceVote, Hash, HeaderExtra, VoteAction};
use ibft_crypto::{hash_concat, KeyPair};
use ibft_snapshot::{ParamSet, SnapshotManager};
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

pub struct LocalBackend {
    key: KeyPair,
    chain: Arc<LocalChain>,
    snapshots: Arc<SnapshotManager>,
    bus: Arc<LocalBus>,
    params: ParamSet,
    votes: Mutex<VecDeque<VoteAction>>,
    engine: Mutex<Option<EngineHandle>>,
}

impl LocalBackend {
    pub fn new(
        key: KeyPair,
        chain: Arc<LocalChain>,
        snapshots: Arc<SnapshotManager>,
        bus: Arc<LocalBus>,
        params: ParamSet,
    ) -> Self {
        Self {
            key,
            chain,
            snapshots,
            bus,
            params,
            votes: Mutex::new(VecDeque::new()),
            engine: Mutex::new(None),
        }
    }

    /// Route `final_committed` to a running engine
    pub fn attach(&self, handle: EngineHandle) {
        *self.engine.lock() = Some(handle);
    }

    pub fn detach(&self) {
        self.engine.lock().take();
    }

    pub fn chain(&self) -> &Arc<LocalChain> {
        &self.chain
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    /// Queue a governance vote for the next block this node proposes
    pub fn queue_vote(&self, action: VoteAction) {
        self.votes.lock().push_back(action);
    }

    pub fn queued_votes(&self) -> Vec<VoteAction> {
        self.votes.lock().iter().cloned().collect()
    }

    /// Build and seal a child of the current head
    pub fn build_proposal(&self, body: Vec<Vec<u8>>) -> Block {
        let parent = self.chain.head();
        let number = parent.number() + 1;
        let vote = self
            .votes
            .lock()
            .front()
            .cloned()
            .map(|action| GovernanceVote::new(self.key.address(), action));

        let mix_hash = self.params.is_randao_active(number).then(|| {
            let previous = parent.header.mix_hash.unwrap_or_else(|| parent.hash());
            let reveal = self.key.sign(&number.to_le_bytes());
            hash_concat(&[previous.as_bytes(), &reveal])
        });

        let mut header = BlockHeader {
            parent_hash: parent.hash(),
            number,
            timestamp: parent.header.timestamp.max(unix_now()),
            payload_root: Block::compute_payload_root(&body),
            mix_hash,
            extra: HeaderExtra {
                vote,
                ..HeaderExtra::default()
            },
        };
        header.extra.seal = self.key.sign(header.seal_hash().as_bytes());
        Block::new(header, body)
    }

    /// Whether this node proposes at `(height, round)`
    pub fn is_proposer_at(&self, height: u64, round: u64) -> Result<bool> {
        let state = self.snapshots.committee_state(height, round)?;
        Ok(state.is_proposer(&self.key.address()))
    }

    /// Import a block committed by other nodes
    ///
    /// The block must extend the head and carry committed seals from a
    /// quorum of its committee. Returns false for a block we already have.
    pub fn import(&self, block: Block) -> Result<bool> {
        let head = self.chain.height();
        if block.number() <= head {
            return Ok(false);
        }
        if block.number() != head + 1 {
            return Err(NodeError::NotNextBlock {
                number: block.number(),
                head,
            });
        }

        let info = self.snapshots.consensus_info(&block.header)?;
        let required = self
            .snapshots
            .committee_state(block.number(), info.round)?
            .required_message_count();
        let valid = info
            .committers
            .iter()
            .filter(|committer| info.committee.contains(committer))
            .collect::<BTreeSet<_>>()
            .len();
        if valid < required {
            return Err(NodeError::InsufficientSeals {
                number: block.number(),
                valid,
                required,
            });
        }

        let number = block.number();
        if !self.chain.append(block.clone())? {
            return Ok(false);
        }
        debug!(number, round = info.round, "Imported block");
        self.on_new_head(&block);
        Ok(true)
    }

    /// Re-announce the head block to every peer
    pub fn announce_head(&self) {
        let head = self.chain.head();
        if head.header.is_genesis() {
            return;
        }
        self.bus.send_all(Envelope::Block {
            from: self.key.address(),
            block: head,
        });
    }

    /// Answer a sync request with every block from `next` on
    pub fn serve_sync(&self, to: Address, next: u64) {
        let from = self.key.address();
        for block in self.chain.blocks_from(next) {
            self.bus.send_to([to].iter(), Envelope::Block { from, block });
        }
    }

    /// Ask `peer` for the blocks we are missing
    pub fn request_sync(&self, peer: Address) {
        let next = self.chain.height() + 1;
        debug!(%peer, next, "Requesting sync");
        self.bus.send_to(
            [peer].iter(),
            Envelope::SyncRequest {
                from: self.key.address(),
                next,
            },
        );
    }

    fn on_new_head(&self, block: &Block) {
        if let Some(vote) = &block.header.extra.vote {
            if vote.voter == self.key.address() {
                let mut votes = self.votes.lock();
                if votes.front() == Some(&vote.action) {
                    votes.pop_front();
                }
            }
        }
        if let Some(handle) = self.engine.lock().as_ref() {
            if let Err(err) = handle.final_committed() {
                debug!(%err, "Engine gone, final committed not delivered");
            }
        }
    }

    fn proposer_of(&self, header: &BlockHeader) -> Address {
        self.snapshots.proposer_of(header).unwrap_or_else(|err| {
            warn!(number = header.number, %err, "Cannot recover proposer");
            Address::ZERO
        })
    }
}

impl Backend for LocalBackend {
    fn address(&self) -> Address {
        self.key.address()
    }

    fn sign(&self, data: &[u8]) -> ibft_consensus::Result<Vec<u8>> {
        Ok(self.key.sign(data))
    }

    fn check_signature(
        &self,
        data: &[u8],
        address: Address,
        signature: &[u8],
    ) -> ibft_consensus::Result<()> {
        Ok(self.snapshots.signers().verify(data, address, signature)?)
    }

    fn recover_signer(&self, data: &[u8], signature: &[u8]) -> ibft_consensus::Result<Address> {
        Ok(self.snapshots.signers().recover(data, signature)?)
    }

    fn broadcast(&self, _prev_hash: Hash, payload: Vec<u8>) {
        self.bus.send_all(Envelope::Consensus {
            from: self.key.address(),
            payload,
        });
    }

    fn gossip(&self, payload: Vec<u8>) {
        self.bus.send_all(Envelope::Consensus {
            from: self.key.address(),
            payload,
        });
    }

    fn gossip_sub_peer(&self, _prev_hash: Hash, payload: Vec<u8>, targets: &BTreeSet<Address>) {
        self.bus.send_to(
            targets.iter(),
            Envelope::Consensus {
                from: self.key.address(),
                payload,
            },
        );
    }

    fn verify(&self, proposal: &Block) -> std::result::Result<(), VerifyError> {
        let parent = self.chain.head();
        if proposal.number() != parent.number() + 1 || proposal.parent_hash() != parent.hash() {
            return Err(VerifyError::Invalid(format!(
                "block {} does not extend head {}",
                proposal.number(),
                parent.number()
            )));
        }
        if Block::compute_payload_root(&proposal.body) != proposal.header.payload_root {
            return Err(VerifyError::Invalid("payload root mismatch".to_string()));
        }
        if proposal.header.timestamp < parent.header.timestamp {
            return Err(VerifyError::Invalid("timestamp before parent".to_string()));
        }

        let signer = self
            .snapshots
            .proposer_of(&proposal.header)
            .map_err(|err| VerifyError::Invalid(err.to_string()))?;
        let validators = self
            .snapshots
            .validators_at(proposal.number())
            .map_err(|err| VerifyError::Invalid(err.to_string()))?;
        if !validators.is_qualified(&signer) {
            return Err(VerifyError::Invalid(format!("sealed by non-validator {signer}")));
        }

        let now = unix_now();
        if proposal.header.timestamp > now {
            return Err(VerifyError::FutureBlock(Duration::from_secs(
                proposal.header.timestamp - now,
            )));
        }
        Ok(())
    }

    fn last_proposal(&self) -> (Block, Address) {
        let head = self.chain.head();
        let proposer = self.proposer_of(&head.header);
        (head, proposer)
    }

    fn has_proposal(&self, hash: &Hash, number: u64) -> bool {
        self.chain.contains(hash, number)
    }

    fn commit(
        &self,
        proposal: &Block,
        round: u64,
        seals: Vec<Vec<u8>>,
    ) -> ibft_consensus::Result<()> {
        let mut block = proposal.clone();
        block.header.extra.committed_seals = seals;
        block.header.extra.round = round;

        let appended = self
            .chain
            .append(block.clone())
            .map_err(|err| ConsensusError::Commit(err.to_string()))?;
        if !appended {
            // imported from a peer first, which already finalised the height
            return Ok(());
        }

        info!(
            number = block.number(),
            hash = %block.hash(),
            round,
            seals = block.header.extra.committed_seals.len(),
            "Block committed"
        );
        self.bus.send_all(Envelope::Block {
            from: self.key.address(),
            block: block.clone(),
        });
        self.on_new_head(&block);
        Ok(())
    }

    fn committee_state_by_round(
        &self,
        height: u64,
        round: u64,
    ) -> ibft_consensus::Result<RoundCommitteeState> {
        self.snapshots
            .committee_state(height, round)
            .map_err(|err| ConsensusError::Committee(err.to_string()))
    }
}

//! Snapshot loading, checkpointing and read APIs
//!
//! Lookup order for the snapshot at `(number, hash)`:
//!
//! 1. recent snapshots held in memory
//! 2. a stored checkpoint (every `checkpoint_interval` blocks)
//! 3. genesis
//!
//! Until one is found, headers are collected walking parent links backwards;
//! they are then replayed forward on top of the snapshot that was found.

use crate::error::{Result, SnapshotError};
use crate::params::{GovernanceReader, StakingReader};
use crate::snapshot::{ApplyContext, Snapshot};
use crate::store::SnapshotStore;
use ibft_committee::{MixHashBeacon, RoundCommitteeState, RoundContext, ValidatorSet};
use ibft_core::{commit_seal_data, Address, BlockHeader, Hash};
use ibft_crypto::{LruCache, RecencyCache, SignerCache};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default blocks between stored checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1024;

/// Default number of recent snapshots kept in memory
pub const DEFAULT_RECENT_SNAPSHOTS: usize = 128;

/// Read access to committed headers
pub trait ChainReader: Send + Sync {
    fn header_by_hash(&self, hash: &Hash) -> Option<BlockHeader>;

    fn header_by_number(&self, number: u64) -> Option<BlockHeader>;
}

/// Consensus participants of a committed block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusInfo {
    pub number: u64,
    pub hash: Hash,
    pub proposer: Address,
    pub committee: Vec<Address>,
    /// Signers of the committed seals
    pub committers: Vec<Address>,
    /// Round in which the block was committed
    pub round: u64,
}

/// Loads and caches snapshots for a chain
pub struct SnapshotManager {
    chain: Arc<dyn ChainReader>,
    governance: Arc<dyn GovernanceReader>,
    staking: Arc<dyn StakingReader>,
    store: Arc<dyn SnapshotStore>,
    signers: Arc<SignerCache>,
    recents: LruCache<Hash, Arc<Snapshot>>,
    checkpoint_interval: u64,
    regen_running: AtomicBool,
}

/// Resets the regen flag when a backfill pass ends, including on error
struct RegenGuard<'a>(&'a AtomicBool);

impl Drop for RegenGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SnapshotManager {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        governance: Arc<dyn GovernanceReader>,
        staking: Arc<dyn StakingReader>,
        store: Arc<dyn SnapshotStore>,
        signers: Arc<SignerCache>,
    ) -> Self {
        Self {
            chain,
            governance,
            staking,
            store,
            signers,
            recents: LruCache::new(DEFAULT_RECENT_SNAPSHOTS),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            regen_running: AtomicBool::new(false),
        }
    }

    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    pub fn with_recent_capacity(mut self, capacity: usize) -> Self {
        self.recents = LruCache::new(capacity);
        self
    }

    pub fn checkpoint_interval(&self) -> u64 {
        self.checkpoint_interval
    }

    pub fn signers(&self) -> &Arc<SignerCache> {
        &self.signers
    }

    fn context(&self) -> ApplyContext<'_> {
        ApplyContext::new(
            self.governance.as_ref(),
            self.staking.as_ref(),
            self.signers.as_ref(),
        )
    }

    fn is_checkpoint(&self, number: u64) -> bool {
        number % self.checkpoint_interval == 0
    }

    /// Snapshot after block `(number, hash)`
    pub fn snapshot(&self, number: u64, hash: Hash) -> Result<Arc<Snapshot>> {
        let ctx = self.context();
        let mut headers = Vec::new();
        let (mut number, mut hash) = (number, hash);

        let base = loop {
            if let Some(snap) = self.recents.get(&hash) {
                break snap;
            }

            if self.is_checkpoint(number) {
                if let Some(snap) = self.store.load(&hash)? {
                    debug!(number, %hash, "Loaded snapshot checkpoint");
                    break Arc::new(snap);
                }
            }

            if number == 0 {
                let genesis = self
                    .chain
                    .header_by_number(0)
                    .filter(|header| header.hash() == hash)
                    .ok_or(SnapshotError::UnknownAncestor { number, hash })?;
                let snap = Snapshot::genesis(&genesis, &ctx)?;
                self.store.store(&snap)?;
                info!(validators = snap.validators.len(), "Stored genesis snapshot");
                break Arc::new(snap);
            }

            let header = self
                .chain
                .header_by_hash(&hash)
                .filter(|header| header.number == number)
                .ok_or(SnapshotError::UnknownAncestor { number, hash })?;
            hash = header.parent_hash;
            number -= 1;
            headers.push(header);
        };

        if headers.is_empty() {
            self.recents.put(base.hash, base.clone());
            return Ok(base);
        }

        headers.reverse();
        let snap = Arc::new(base.apply(&headers, &ctx)?);
        self.recents.put(snap.hash, snap.clone());

        if self.is_checkpoint(snap.number) {
            self.store.store(&snap)?;
            debug!(number = snap.number, "Stored snapshot checkpoint");
        }
        Ok(snap)
    }

    /// Backfill missing checkpoints between two heights
    ///
    /// Only one backfill runs at a time; a concurrent call returns `Ok(0)`
    /// without doing anything. Returns the number of checkpoints written.
    pub fn regen(&self, from: u64, to: u64) -> Result<usize> {
        if self
            .regen_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(from, to, "Snapshot regen already running");
            return Ok(0);
        }
        let _guard = RegenGuard(&self.regen_running);

        let interval = self.checkpoint_interval;
        let first = from.div_ceil(interval) * interval;
        let mut written = 0;

        for number in (first..=to).step_by(interval as usize) {
            let Some(header) = self.chain.header_by_number(number) else {
                warn!(number, "Missing header during snapshot regen");
                break;
            };
            let hash = header.hash();
            if self.store.contains(&hash)? {
                continue;
            }
            // checkpoint heights are stored by `snapshot` unless served from memory
            let snap = self.snapshot(number, hash)?;
            if !self.store.contains(&hash)? {
                self.store.store(&snap)?;
            }
            written += 1;
        }

        if written > 0 {
            info!(from, to, written, "Regenerated snapshot checkpoints");
        }
        Ok(written)
    }

    /// Whether a backfill pass is in progress
    pub fn is_regenerating(&self) -> bool {
        self.regen_running.load(Ordering::Acquire)
    }

    /// Validator set that validated block `number`
    ///
    /// This is the snapshot of its parent; block 0 reports the genesis set.
    pub fn validators_at(&self, number: u64) -> Result<ValidatorSet> {
        let parent_number = number.saturating_sub(1);
        let parent = self
            .chain
            .header_by_number(parent_number)
            .ok_or(SnapshotError::UnknownAncestor {
                number: parent_number,
                hash: Hash::ZERO,
            })?;
        Ok(self.snapshot(parent.number, parent.hash())?.validators.clone())
    }

    /// Validator set that validated the block with `hash`
    pub fn validators_by_hash(&self, hash: &Hash) -> Result<ValidatorSet> {
        let header = self
            .chain
            .header_by_hash(hash)
            .ok_or(SnapshotError::UnknownAncestor {
                number: 0,
                hash: *hash,
            })?;
        self.validators_at(header.number)
    }

    /// Proposer of a sealed header (zero for genesis)
    pub fn proposer_of(&self, header: &BlockHeader) -> Result<Address> {
        if header.is_genesis() {
            return Ok(Address::ZERO);
        }
        Ok(self
            .signers
            .recover(header.seal_hash().as_bytes(), &header.extra.seal)?)
    }

    /// Committee state for `(height, round)`, derived from the parent snapshot
    pub fn committee_state(&self, height: u64, round: u64) -> Result<RoundCommitteeState> {
        let parent_number = height
            .checked_sub(1)
            .ok_or(SnapshotError::UnknownAncestor {
                number: 0,
                hash: Hash::ZERO,
            })?;
        let parent = self
            .chain
            .header_by_number(parent_number)
            .ok_or(SnapshotError::UnknownAncestor {
                number: parent_number,
                hash: Hash::ZERO,
            })?;
        self.committee_state_on(&parent, height, round)
    }

    fn committee_state_on(
        &self,
        parent: &BlockHeader,
        height: u64,
        round: u64,
    ) -> Result<RoundCommitteeState> {
        let snap = self.snapshot(parent.number, parent.hash())?;
        let last_proposer = self.proposer_of(parent)?;
        let params = snap.params_at(&self.context(), height);

        let beacon = parent
            .mix_hash
            .filter(|_| params.is_randao_active(height))
            .map(MixHashBeacon::new);
        let mut ctx = RoundContext::new(height, round, parent.hash(), last_proposer);
        if let Some(beacon) = &beacon {
            ctx = ctx.with_beacon(beacon);
        }

        Ok(RoundCommitteeState::new(&snap.validators, &ctx)?)
    }

    /// Proposer, committee, committers and round of a committed header
    ///
    /// The committee is the one of the commit round recorded in the header.
    /// A locked block re-proposed in a later round is still sealed by its
    /// first proposer, so `proposer` need not lead that committee.
    pub fn consensus_info(&self, header: &BlockHeader) -> Result<ConsensusInfo> {
        let hash = header.hash();
        if header.is_genesis() {
            return Ok(ConsensusInfo {
                number: 0,
                hash,
                proposer: Address::ZERO,
                committee: Vec::new(),
                committers: Vec::new(),
                round: 0,
            });
        }

        let parent = self
            .chain
            .header_by_hash(&header.parent_hash)
            .ok_or(SnapshotError::UnknownAncestor {
                number: header.number - 1,
                hash: header.parent_hash,
            })?;
        let proposer = self.proposer_of(header)?;
        let round = header.extra.round;
        let state = self.committee_state_on(&parent, header.number, round)?;

        let seal_data = commit_seal_data(&hash, round);
        let committers = header
            .extra
            .committed_seals
            .iter()
            .map(|seal| self.signers.recover(&seal_data, seal))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ConsensusInfo {
            number: header.number,
            hash,
            proposer,
            committee: state.committee().to_vec(),
            committers,
            round,
        })
    }
}

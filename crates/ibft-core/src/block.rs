//! Block headers, proposals and header-embedded governance votes

use crate::error::{CoreError, Result};
use crate::params::ProposerPolicy;
use crate::types::{Address, Hash};
use serde::{Deserialize, Serialize};

/// Domain tags keep seal and block hashes from colliding
const SEAL_HASH_TAG: &[u8] = b"ibft/seal/v1";
const BLOCK_HASH_TAG: &[u8] = b"ibft/block/v1";

/// Wire code of a commit message, appended to committed-seal data
pub const COMMIT_MSG_CODE: u8 = 2;

/// Bytes a committer signs to produce its committed seal for `hash`
///
/// The round is bound in so a header cannot claim a round other than the
/// one its seals were collected in.
pub fn commit_seal_data(hash: &Hash, round: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(41);
    data.extend_from_slice(hash.as_bytes());
    data.extend_from_slice(&round.to_le_bytes());
    data.push(COMMIT_MSG_CODE);
    data
}

/// A governance change requested by a vote
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VoteAction {
    /// Add an address to the council
    AddValidator(Address),

    /// Remove an address from the council
    RemoveValidator(Address),

    /// Change the committee size
    CommitteeSize(u64),

    /// Change the proposer policy
    ProposerPolicy(ProposerPolicy),

    /// Change the minimum stake for qualification
    MinimumStake(u64),
}

/// Tally key: one active vote per voter per key
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VoteKey {
    AddValidator(Address),
    RemoveValidator(Address),
    CommitteeSize,
    ProposerPolicy,
    MinimumStake,
}

impl VoteAction {
    pub fn key(&self) -> VoteKey {
        match self {
            VoteAction::AddValidator(addr) => VoteKey::AddValidator(*addr),
            VoteAction::RemoveValidator(addr) => VoteKey::RemoveValidator(*addr),
            VoteAction::CommitteeSize(_) => VoteKey::CommitteeSize,
            VoteAction::ProposerPolicy(_) => VoteKey::ProposerPolicy,
            VoteAction::MinimumStake(_) => VoteKey::MinimumStake,
        }
    }

    /// Membership changes take effect as soon as they pass
    pub fn is_membership(&self) -> bool {
        matches!(
            self,
            VoteAction::AddValidator(_) | VoteAction::RemoveValidator(_)
        )
    }

    fn encode_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            VoteAction::AddValidator(addr) => {
                hasher.update(&[0]);
                hasher.update(addr.as_bytes());
            }
            VoteAction::RemoveValidator(addr) => {
                hasher.update(&[1]);
                hasher.update(addr.as_bytes());
            }
            VoteAction::CommitteeSize(size) => {
                hasher.update(&[2]);
                hasher.update(&size.to_le_bytes());
            }
            VoteAction::ProposerPolicy(policy) => {
                hasher.update(&[3]);
                hasher.update(&[*policy as u8]);
            }
            VoteAction::MinimumStake(stake) => {
                hasher.update(&[4]);
                hasher.update(&stake.to_le_bytes());
            }
        }
    }
}

/// Governance vote carried in a header, cast by the header's proposer
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GovernanceVote {
    /// Validator casting the vote
    pub voter: Address,

    /// Requested change
    pub action: VoteAction,
}

impl GovernanceVote {
    pub fn new(voter: Address, action: VoteAction) -> Self {
        Self { voter, action }
    }
}

/// Consensus-specific header data
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderExtra {
    /// Initial council (genesis header only)
    pub validators: Vec<Address>,

    /// Optional governance vote
    pub vote: Option<GovernanceVote>,

    /// Proposer signature over `seal_hash()`
    pub seal: Vec<u8>,

    /// Committer signatures over the commit payload of `hash()`
    pub committed_seals: Vec<Vec<u8>>,

    /// Round the committed seals were collected in
    ///
    /// Set together with the committed seals and, like them, left out of
    /// `hash()`: a locked block re-proposed in a later round keeps its hash.
    pub round: u64,
}

/// Block header
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the parent block
    pub parent_hash: Hash,

    /// Block height
    pub number: u64,

    /// Unix timestamp in seconds
    pub timestamp: u64,

    /// Commitment to the block body
    pub payload_root: Hash,

    /// Randomness beacon output (set once the beacon fork is active)
    pub mix_hash: Option<Hash>,

    /// Consensus data
    pub extra: HeaderExtra,
}

impl BlockHeader {
    /// Genesis header carrying the initial council
    pub fn genesis(validators: Vec<Address>, timestamp: u64) -> Self {
        Self {
            parent_hash: Hash::ZERO,
            number: 0,
            timestamp,
            payload_root: Hash::ZERO,
            mix_hash: None,
            extra: HeaderExtra {
                validators,
                ..HeaderExtra::default()
            },
        }
    }

    fn hash_fields(&self, tag: &[u8], include_seal: bool) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(tag);
        hasher.update(self.parent_hash.as_bytes());
        hasher.update(&self.number.to_le_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(self.payload_root.as_bytes());
        match &self.mix_hash {
            Some(mix) => {
                hasher.update(&[1]);
                hasher.update(mix.as_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        hasher.update(&(self.extra.validators.len() as u64).to_le_bytes());
        for validator in &self.extra.validators {
            hasher.update(validator.as_bytes());
        }
        match &self.extra.vote {
            Some(vote) => {
                hasher.update(&[1]);
                hasher.update(vote.voter.as_bytes());
                vote.action.encode_into(&mut hasher);
            }
            None => {
                hasher.update(&[0]);
            }
        }
        if include_seal {
            hasher.update(&(self.extra.seal.len() as u64).to_le_bytes());
            hasher.update(&self.extra.seal);
        }
        Hash::new(*hasher.finalize().as_bytes())
    }

    /// Digest the proposer signs; excludes the seal and committed seals
    pub fn seal_hash(&self) -> Hash {
        self.hash_fields(SEAL_HASH_TAG, false)
    }

    /// Block hash; excludes committed seals and the commit round so
    /// committers can sign it
    pub fn hash(&self) -> Hash {
        self.hash_fields(BLOCK_HASH_TAG, true)
    }

    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }
}

/// The proposal agreed on at each height
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,

    /// Opaque transaction payloads
    pub body: Vec<Vec<u8>>,
}

impl Block {
    pub fn new(header: BlockHeader, body: Vec<Vec<u8>>) -> Self {
        Self { header, body }
    }

    /// Commitment over the body, to be stored in `payload_root`
    pub fn compute_payload_root(body: &[Vec<u8>]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        for tx in body {
            hasher.update(&(tx.len() as u64).to_le_bytes());
            hasher.update(tx);
        }
        Hash::new(*hasher.finalize().as_bytes())
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
    }
}

//! Host services the consensus core depends on

use crate::error::{Result, VerifyError};
use ibft_committee::RoundCommitteeState;
use ibft_core::{Address, Block, Hash};
use std::collections::BTreeSet;

/// Everything the core needs from the node hosting it
///
/// Network calls are fire-and-forget and never deliver to the local node;
/// the core feeds its own messages back through its event queue.
pub trait Backend: Send + Sync {
    /// Local validator address
    fn address(&self) -> Address;

    /// Sign with the local validator key
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Check that `signature` over `data` was produced by `address`
    fn check_signature(&self, data: &[u8], address: Address, signature: &[u8]) -> Result<()>;

    /// Signer of `signature` over `data`, memoised
    fn recover_signer(&self, data: &[u8], signature: &[u8]) -> Result<Address>;

    /// Send to every validator
    fn broadcast(&self, prev_hash: Hash, payload: Vec<u8>);

    /// Send to every connected validator peer
    fn gossip(&self, payload: Vec<u8>);

    /// Send to the listed validators only
    fn gossip_sub_peer(&self, prev_hash: Hash, payload: Vec<u8>, targets: &BTreeSet<Address>);

    /// Validate a proposal
    fn verify(&self, proposal: &Block) -> std::result::Result<(), VerifyError>;

    /// Head block and the address that sealed it
    fn last_proposal(&self) -> (Block, Address);

    /// Whether `hash` at `number` is already on the chain
    fn has_proposal(&self, hash: &Hash, number: u64) -> bool;

    /// Write a decided block together with its committed seals
    ///
    /// `round` is the round the seals were collected in and must be stored
    /// with them; the seals only verify against it.
    fn commit(&self, proposal: &Block, round: u64, seals: Vec<Vec<u8>>) -> Result<()>;

    /// Committee, proposer and thresholds for `(height, round)`
    fn committee_state_by_round(&self, height: u64, round: u64) -> Result<RoundCommitteeState>;
}

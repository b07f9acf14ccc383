//! # Istanbul BFT Snapshots
//!
//! Deterministic derivation of the validator set in effect at any height.
//!
//! A [`Snapshot`] is the validator-set state after one committed block. Headers
//! are replayed strictly in order on top of a base snapshot; each may carry a
//! governance vote, and under the weighted-random policy stake changes refresh
//! weights, demotion and the proposer permutation.
//!
//! The [`SnapshotManager`] caches recent snapshots, persists checkpoints every
//! `checkpoint_interval` blocks through a [`SnapshotStore`], and serves the
//! read APIs (validators by number or hash, committee state, consensus info).

pub mod error;
pub mod manager;
pub mod params;
pub mod snapshot;
pub mod store;
pub mod tally;

pub use error::*;
pub use manager::*;
pub use params::*;
pub use snapshot::*;
pub use store::*;
pub use tally::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Result, SnapshotError};
    pub use crate::manager::{ChainReader, ConsensusInfo, SnapshotManager};
    pub use crate::params::{
        GovernanceReader, ParamSet, StakingInfo, StakingReader, StaticGovernance, StaticStaking,
    };
    pub use crate::snapshot::{ApplyContext, Snapshot};
    pub use crate::store::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
}

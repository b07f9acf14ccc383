//! # Istanbul BFT Core
//!
//! Core data types shared by every crate of the consensus engine.
//!
//! This crate provides the fundamental building blocks:
//! - `Address` / `Hash` - validator identity and 256-bit digests
//! - `View` - the `(sequence, round)` pair every consensus message is bound to
//! - `BlockHeader` / `Block` - the proposal unit agreed on per height
//! - `GovernanceVote` - membership and parameter votes carried in headers
//!
//! ## Header Layout
//!
//! ```text
//!   ┌──────────────────────────── BlockHeader ─────────────────────────────┐
//!   │ parent_hash │ number │ timestamp │ payload_root │ mix_hash │ extra   │
//!   └─────────────────────────────────────────────────────────────┬───────┘
//!                                                                  │
//!                    ┌──────────────── HeaderExtra ────────────────┴──────┐
//!                    │ validators │ vote │ seal │ committed_seals │ round   │
//!                    └─────────────────────────────────────────────────────┘
//!
//!   seal_hash() = H(header without seal, committed seals, round) → signed by proposer
//!   hash()      = H(header without committed seals, round)       → signed by committers
//!                                                                  together with round
//! ```

pub mod block;
pub mod error;
pub mod params;
pub mod types;

pub use block::*;
pub use error::*;
pub use params::*;
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::block::{Block, BlockHeader, GovernanceVote, HeaderExtra, VoteAction};
    pub use crate::error::{CoreError, Result};
    pub use crate::params::{GovernanceMode, ProposerPolicy};
    pub use crate::types::{Address, Hash, View};
}

//! # Istanbul BFT Committee Model
//!
//! Derives, for any `(height, round)`, who may propose, who votes and how many
//! matching votes are needed.
//!
//! ```text
//!   ValidatorSet ──(RoundContext)──► RoundCommitteeState
//!     council                          committee / non_committee
//!     ├─ qualified                     proposer
//!     └─ demoted                       quorum, f
//! ```
//!
//! The council comes in two closed variants chosen by proposer policy: a
//! fixed council (round-robin, sticky) and a weighted council carrying stakes,
//! weights and a shuffled proposer permutation.

pub mod error;
pub mod quorum;
pub mod round_state;
pub mod selection;
pub mod validator_set;
pub mod weights;

pub use error::*;
pub use quorum::*;
pub use round_state::*;
pub use selection::*;
pub use validator_set::*;
pub use weights::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{CommitteeError, Result};
    pub use crate::quorum::{calc_fault_tolerance, calc_quorum_size};
    pub use crate::round_state::RoundCommitteeState;
    pub use crate::selection::{MixHashBeacon, ProposerBeacon, RoundContext};
    pub use crate::validator_set::{CouncilKind, ValidatorSet, WeightedCouncil};
}

//! # Istanbul BFT Consensus
//!
//! Three-phase agreement on one block per height among a rotating committee:
//!
//! ```text
//!   proposer ──preprepare──► committee ──prepare──► committee ──commit──► Backend::commit
//!                                  │
//!                                  └── timeout ──► round change ──► next round, same height
//! ```
//!
//! A node that saw a prepare quorum locks onto that proposal for the rest of
//! the height and will only accept or re-propose the locked value, which is
//! what keeps two quorums from deciding different blocks across round changes.
//!
//! The [`Core`] state machine is synchronous and returns [`Action`]s; the
//! [`Engine`] runs it on tokio with timers and a single ordered event queue.

pub mod backend;
pub mod backlog;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod message;
pub mod message_set;
pub mod protocol;
pub mod round_change_set;
pub mod round_state;
pub mod router;
pub mod timer;

pub use backend::*;
pub use backlog::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use event::*;
pub use message::*;
pub use message_set::*;
pub use protocol::*;
pub use round_change_set::*;
pub use round_state::*;
pub use router::*;
pub use timer::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::Backend;
    pub use crate::config::ConsensusConfig;
    pub use crate::engine::{Engine, EngineHandle};
    pub use crate::error::{ConsensusError, Result, VerifyError};
    pub use crate::event::{Action, EngineNotification, Event, TimerId};
    pub use crate::message::{Message, MessageCode, Preprepare, Subject};
    pub use crate::protocol::Core;
    pub use crate::round_state::State;
}

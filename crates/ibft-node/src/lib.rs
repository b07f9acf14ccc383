//! # Istanbul BFT Node
//!
//! Plumbing around the consensus engine:
//!
//! - [`config`]: TOML configuration with `IBFT_` environment overrides
//! - [`logging`]: tracing subscriber setup
//! - [`metrics`]: prometheus registry fed by engine notifications
//! - [`local`]: validators running in one process over a filtered bus

pub mod config;
pub mod error;
pub mod local;
pub mod logging;
pub mod metrics;

pub use config::{
    GovernanceConfig, LoggingConfig, MetricsConfig, NodeConfig, NodeSettings, SnapshotConfig,
};
pub use error::{NodeError, Result};
pub use local::{LocalBackend, LocalBus, LocalChain, LocalNetwork, LocalNode};
pub use logging::init_logging;
pub use metrics::ConsensusMetrics;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::NodeConfig;
    pub use crate::error::{NodeError, Result};
    pub use crate::local::{LocalNetwork, LocalNode};
    pub use crate::logging::init_logging;
    pub use crate::metrics::ConsensusMetrics;
}

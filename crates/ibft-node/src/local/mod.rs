//! In-process validator network used by the simulator and end-to-end tests

pub mod backend;
pub mod bus;
pub mod chain;
pub mod network;

pub use backend::LocalBackend;
pub use bus::{BusStats, Envelope, LinkFilter, LocalBus};
pub use chain::LocalChain;
pub use network::{genesis_block, simulation_key, LocalNetwork, LocalNode};

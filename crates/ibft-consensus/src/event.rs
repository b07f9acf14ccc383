//! Inputs to and outputs from the consensus core

use crate::message::Message;
use crate::round_state::State;
use ibft_core::{Block, Hash, View};
use std::time::Duration;

/// Everything that can drive the core
#[derive(Clone, Debug)]
pub enum Event {
    /// Host asks to propose this block
    Request(Block),
    /// Encoded message from the network or from ourselves
    Message(Vec<u8>),
    /// Previously checked message replayed from the backlog
    Backlog(Message),
    /// Round-change timer fired for this view
    Timeout(View),
    /// Host finished writing the decided block
    FinalCommitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerId {
    RoundChange,
    FuturePreprepare,
}

/// Observable progress of one core
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineNotification {
    StateChanged {
        view: View,
        state: State,
    },
    NewRound {
        view: View,
        /// Entered through a round change rather than a new height
        round_change: bool,
    },
    Committed {
        number: u64,
        hash: Hash,
        round: u64,
        seals: usize,
    },
    Timeout {
        view: View,
    },
}

/// Side effects requested by the core
#[derive(Clone, Debug)]
pub enum Action {
    /// Deliver `event` after `duration`, replacing any timer with the same id
    SetTimer {
        id: TimerId,
        duration: Duration,
        event: Event,
    },
    CancelTimer {
        id: TimerId,
    },
    /// Handle `event` before any external input
    EnqueueInternal {
        event: Event,
    },
    Notify(EngineNotification),
}

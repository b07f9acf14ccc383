//! Tokio actor running one [`Core`]
//!
//! External inputs arrive on an unbounded queue. Events the core raises for
//! itself (its own messages, backlog replays, pending requests) are handled
//! before the next external input, so a round-change quorum and a timer can
//! never interleave inside one transition.

use crate::backend::Backend;
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, Result};
use crate::event::{Action, EngineNotification, Event};
use crate::protocol::Core;
use crate::timer::TimerManager;
use ibft_core::{Address, Block};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Buffered notifications per subscriber
const NOTIFICATION_CAPACITY: usize = 1024;

/// Input to the engine loop
#[derive(Debug)]
pub enum EngineCommand {
    Event(Event),
    Stop,
}

/// Cloneable sender side of a running engine
#[derive(Clone)]
pub struct EngineHandle {
    address: Address,
    tx: mpsc::UnboundedSender<EngineCommand>,
    notifications: broadcast::Sender<EngineNotification>,
}

impl EngineHandle {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Ask the engine to propose `block`
    pub fn request(&self, block: Block) -> Result<()> {
        self.send(EngineCommand::Event(Event::Request(block)))
    }

    /// Hand over an encoded consensus message received from a peer
    pub fn deliver(&self, payload: Vec<u8>) -> Result<()> {
        self.send(EngineCommand::Event(Event::Message(payload)))
    }

    /// Signal that the decided block is written and the next height can start
    pub fn final_committed(&self) -> Result<()> {
        self.send(EngineCommand::Event(Event::FinalCommitted))
    }

    pub fn stop(&self) -> Result<()> {
        self.send(EngineCommand::Stop)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotification> {
        self.notifications.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, command: EngineCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| ConsensusError::Stopped)
    }
}

/// A started engine
pub struct Engine {
    handle: EngineHandle,
    task: JoinHandle<()>,
}

impl Engine {
    /// Start the core and spawn its event loop on the current runtime
    ///
    /// Refuses to start when the committee for the next height cannot be
    /// derived.
    pub fn start(backend: Arc<dyn Backend>, config: ConsensusConfig) -> Result<Self> {
        let mut core = Core::new(backend, config);
        let actions = core.start()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let handle = EngineHandle {
            address: core.address(),
            tx: tx.clone(),
            notifications: notifications.clone(),
        };

        let mut runner = EngineLoop {
            core,
            rx,
            timers: TimerManager::new(tx),
            internal: VecDeque::new(),
            notifications,
        };
        runner.run_actions(actions);

        info!(address = %handle.address, "Consensus engine started");
        let task = tokio::spawn(runner.run());
        Ok(Self { handle, task })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop the loop and wait for it to finish
    pub async fn shutdown(self) -> Result<()> {
        // already stopped if the queue is gone
        let _ = self.handle.stop();
        self.task.await.map_err(|_| ConsensusError::Stopped)
    }
}

struct EngineLoop {
    core: Core,
    rx: mpsc::UnboundedReceiver<EngineCommand>,
    timers: TimerManager,
    internal: VecDeque<Event>,
    notifications: broadcast::Sender<EngineNotification>,
}

impl EngineLoop {
    async fn run(mut self) {
        loop {
            if let Some(event) = self.internal.pop_front() {
                self.dispatch(event);
                continue;
            }
            match self.rx.recv().await {
                Some(EngineCommand::Event(event)) => self.dispatch(event),
                Some(EngineCommand::Stop) | None => break,
            }
        }

        let actions = self.core.stop();
        self.run_actions(actions);
        self.timers.cancel_all();
        info!(address = %self.core.address(), "Consensus engine stopped");
    }

    fn dispatch(&mut self, event: Event) {
        match self.core.handle_event(event) {
            Ok(actions) => self.run_actions(actions),
            Err(err) => {
                error!(view = ?self.core.view(), %err, "Consensus event failed");
                let actions = self.core.take_actions();
                self.run_actions(actions);
            }
        }
    }

    fn run_actions(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::SetTimer { id, duration, event } => {
                    self.timers.set_timer(id, duration, event)
                }
                Action::CancelTimer { id } => self.timers.cancel_timer(id),
                Action::EnqueueInternal { event } => self.internal.push_back(event),
                Action::Notify(notification) => {
                    // no subscribers is fine
                    let _ = self.notifications.send(notification);
                }
            }
        }
    }
}

//! Timers for the engine actor
//!
//! Each timer is a tokio task that sleeps and then posts its event to the
//! engine queue. Setting a timer replaces the one with the same id.

use crate::engine::EngineCommand;
use crate::event::{Event, TimerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

pub struct TimerManager {
    timers: HashMap<TimerId, JoinHandle<()>>,
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl TimerManager {
    pub fn new(tx: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self {
            timers: HashMap::new(),
            tx,
        }
    }

    /// Post `event` after `duration`
    pub fn set_timer(&mut self, id: TimerId, duration: Duration, event: Event) {
        self.cancel_timer(id);

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?id, "Timer fired");
            // engine gone: nothing to wake
            let _ = tx.send(EngineCommand::Event(event));
        });

        self.timers.insert(id, handle);
        debug!(?id, ?duration, "Timer set");
    }

    /// No-op when the timer does not exist or already fired
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
            trace!(?id, "Timer cancelled");
        }
    }

    pub fn cancel_all(&mut self) {
        for (id, handle) in self.timers.drain() {
            handle.abort();
            trace!(?id, "Timer cancelled (shutdown)");
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

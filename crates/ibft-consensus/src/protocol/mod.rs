//! The Istanbul BFT state machine
//!
//! A [`Core`] is driven by one event at a time and never blocks. It talks to
//! the network and the chain through a [`Backend`] and returns the timers and
//! internal events it needs as [`Action`]s for the caller to run.
//!
//! ```text
//!            ┌──────────────────── round change ────────────────────┐
//!            ▼                                                      │
//!   AcceptRequest ──preprepare──► Preprepared ──quorum prepares──► Prepared
//!                                                                   │
//!                                           quorum commits          ▼
//!   new height ◄──── final committed ──── Committed ◄───────────────┘
//! ```

mod commit;
mod prepare;
mod preprepare;
mod request;
mod round_change;

use crate::backend::Backend;
use crate::backlog::{Backlog, Replay};
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, Result};
use crate::event::{Action, EngineNotification, Event, TimerId};
use crate::message::{Message, MessageCode};
use crate::round_change_set::RoundChangeSet;
use crate::round_state::{RoundState, State};
use crate::router::gossip_targets;
use ibft_committee::RoundCommitteeState;
use ibft_core::{Address, Block, Hash, View};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Where a message for `view` stands relative to the local position
pub fn check_view(
    code: MessageCode,
    view: View,
    current: View,
    waiting_for_round_change: bool,
    state: State,
) -> Result<()> {
    if code == MessageCode::RoundChange {
        if view.sequence > current.sequence {
            return Err(ConsensusError::FutureMessage);
        }
        if view < current {
            return Err(ConsensusError::OldMessage);
        }
        return Ok(());
    }

    if view > current {
        return Err(ConsensusError::FutureMessage);
    }
    if view < current {
        return Err(ConsensusError::OldMessage);
    }
    // only round changes count until the new round starts
    if waiting_for_round_change {
        return Err(ConsensusError::FutureMessage);
    }
    if state == State::AcceptRequest && code != MessageCode::Preprepare {
        return Err(ConsensusError::FutureMessage);
    }
    Ok(())
}

pub struct Core {
    backend: Arc<dyn Backend>,
    config: ConsensusConfig,
    address: Address,
    started: bool,
    state: State,
    current: RoundState,
    committee: Option<RoundCommitteeState>,
    round_change_set: RoundChangeSet,
    waiting_for_round_change: bool,
    backlog: Backlog,
    pending_requests: BTreeMap<u64, Block>,
    actions: Vec<Action>,
}

impl Core {
    pub fn new(backend: Arc<dyn Backend>, config: ConsensusConfig) -> Self {
        let address = backend.address();
        let backlog = Backlog::new(config.backlog_capacity);
        Self {
            backend,
            config,
            address,
            started: false,
            state: State::AcceptRequest,
            current: RoundState::default(),
            committee: None,
            round_change_set: RoundChangeSet::default(),
            waiting_for_round_change: false,
            backlog,
            pending_requests: BTreeMap::new(),
            actions: Vec::new(),
        }
    }

    /// Enter the height after the backend's last proposal
    ///
    /// Fails when the committee for that height cannot be derived.
    pub fn start(&mut self) -> Result<Vec<Action>> {
        self.start_new_round(0)?;
        Ok(self.take_actions())
    }

    pub fn stop(&mut self) -> Vec<Action> {
        self.started = false;
        self.backlog.clear();
        self.pending_requests.clear();
        self.actions.clear();
        vec![
            Action::CancelTimer {
                id: TimerId::RoundChange,
            },
            Action::CancelTimer {
                id: TimerId::FuturePreprepare,
            },
        ]
    }

    /// Handle one event and return the actions it produced
    ///
    /// Protocol violations are logged and absorbed. Errors that leave the
    /// committee unknown are returned; the actions produced before the error
    /// stay buffered and can be collected with [`Core::take_actions`].
    pub fn handle_event(&mut self, event: Event) -> Result<Vec<Action>> {
        if !self.started {
            return Err(ConsensusError::NotStarted);
        }

        let result = match event {
            Event::Request(block) => self.handle_request(block),
            Event::Message(bytes) => self.handle_message(&bytes),
            Event::Backlog(msg) => self.handle_checked(msg),
            Event::Timeout(view) => self.handle_timeout(view),
            Event::FinalCommitted => self.handle_final_committed(),
        };

        match result {
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) if err.is_future() || err.is_old() => {
                trace!(view = ?self.current.view(), %err, "Message out of view");
            }
            Err(err) => {
                debug!(view = ?self.current.view(), state = %self.state, %err, "Event rejected");
            }
            Ok(()) => {}
        }
        Ok(self.take_actions())
    }

    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    /// Decode, authenticate and handle a message
    pub fn handle_message(&mut self, bytes: &[u8]) -> Result<()> {
        let msg = Message::from_bytes(bytes)?;
        let signer = self.backend.recover_signer(&msg.signing_bytes(), &msg.signature)?;
        if signer != msg.address {
            return Err(ConsensusError::InvalidSigner {
                claimed: msg.address,
                recovered: signer,
            });
        }
        if !self.committee()?.is_qualified(&msg.address) {
            warn!(from = %msg.address, code = %msg.code, "Message from unqualified sender");
            return Err(ConsensusError::Unauthorized(msg.address));
        }
        self.handle_checked(msg)
    }

    fn handle_checked(&mut self, msg: Message) -> Result<()> {
        let result = match msg.code {
            MessageCode::Preprepare => self.handle_preprepare(&msg),
            MessageCode::Prepare => self.handle_prepare(&msg),
            MessageCode::Commit => self.handle_commit(&msg),
            MessageCode::RoundChange => self.handle_round_change(&msg),
        };
        if matches!(result, Err(ConsensusError::FutureMessage)) {
            self.store_backlog(msg);
        }
        result
    }

    fn handle_timeout(&mut self, view: View) -> Result<()> {
        if view != self.current.view() {
            trace!(timer = ?view, current = ?self.current.view(), "Stale round timeout");
            return Ok(());
        }
        debug!(view = ?view, state = %self.state, "Round timeout");
        self.notify(EngineNotification::Timeout { view });

        if !self.waiting_for_round_change {
            let weak = self.committee()?.f() + 1;
            if let Some(round) = self.round_change_set.max_round(weak) {
                if round > self.current.round() {
                    return self.send_round_change(round);
                }
            }
        }

        let (last, _) = self.backend.last_proposal();
        if last.number() >= self.current.sequence() {
            return self.start_new_round(0);
        }
        self.send_next_round_change()
    }

    fn handle_final_committed(&mut self) -> Result<()> {
        debug!(sequence = self.current.sequence(), "Received final committed");
        self.start_new_round(0)
    }

    /// Move to `round`, or to the next height once the last proposal catches up
    pub(crate) fn start_new_round(&mut self, round: u64) -> Result<()> {
        let (last_proposal, last_proposer) = self.backend.last_proposal();
        let last_number = last_proposal.number();

        let round_change = if !self.started || last_number >= self.current.sequence() {
            false
        } else if last_number + 1 == self.current.sequence() {
            if round == 0 {
                return Ok(());
            }
            if round < self.current.round() {
                warn!(
                    round,
                    current = self.current.round(),
                    "New round should not be smaller than current round"
                );
                return Ok(());
            }
            true
        } else {
            warn!(
                last = last_number,
                sequence = self.current.sequence(),
                "New sequence should be larger than current sequence"
            );
            return Ok(());
        };

        let view = if round_change {
            View::new(self.current.sequence(), round)
        } else {
            View::new(last_number + 1, 0)
        };

        let committee = self.backend.committee_state_by_round(view.sequence, view.round)?;
        if round_change && self.round_change_set.sequence() == view.sequence {
            // round changes already gathered for later rounds stay useful
            self.round_change_set.clear(view.round);
        } else {
            let qualified: Vec<Address> = committee
                .committee()
                .iter()
                .chain(committee.non_committee())
                .copied()
                .collect();
            self.round_change_set = RoundChangeSet::new(view.sequence, qualified);
        }
        self.update_round_state(view, last_proposal.hash(), &committee, round_change);
        self.committee = Some(committee);
        self.started = true;
        self.waiting_for_round_change = false;

        info!(
            sequence = view.sequence,
            round = view.round,
            last_proposer = %last_proposer,
            proposer = %self.committee()?.proposer(),
            is_proposer = self.is_proposer(),
            "New round"
        );
        self.notify(EngineNotification::NewRound { view, round_change });
        self.set_state(State::AcceptRequest);

        if round_change && self.is_proposer() {
            // a locked proposal is the only value this node may propose again
            let reproposal = if self.current.is_hash_locked() {
                self.current.proposal().cloned()
            } else {
                self.current.pending_request().cloned()
            };
            if let Some(block) = reproposal {
                self.send_preprepare(block)?;
            }
        }

        self.new_round_change_timer();
        Ok(())
    }

    /// Join `view` and wait for a round-change quorum there
    pub(crate) fn catch_up_round(&mut self, view: View) -> Result<()> {
        let committee = self.backend.committee_state_by_round(view.sequence, view.round)?;
        self.waiting_for_round_change = true;
        let prev_hash = self.current.prev_hash();
        self.update_round_state(view, prev_hash, &committee, true);
        self.committee = Some(committee);
        self.round_change_set.clear(view.round);

        info!(sequence = view.sequence, round = view.round, "Catch up round");
        self.notify(EngineNotification::NewRound {
            view,
            round_change: true,
        });
        self.new_round_change_timer();
        Ok(())
    }

    fn update_round_state(
        &mut self,
        view: View,
        prev_hash: Hash,
        committee: &RoundCommitteeState,
        round_change: bool,
    ) {
        self.current = if round_change {
            self.current.next(view, committee.committee())
        } else {
            RoundState::new(view, prev_hash, committee.committee())
        };
    }

    pub(crate) fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!(view = ?self.current.view(), from = %self.state, to = %state, "State change");
            self.state = state;
            self.notify(EngineNotification::StateChanged {
                view: self.current.view(),
                state,
            });
        }
        if state == State::AcceptRequest {
            self.process_pending_requests();
        }
        self.process_backlog();
    }

    fn new_round_change_timer(&mut self) {
        let view = self.current.view();
        self.actions.push(Action::SetTimer {
            id: TimerId::RoundChange,
            duration: self.config.round_timeout(view.round),
            event: Event::Timeout(view),
        });
    }

    fn store_backlog(&mut self, msg: Message) {
        if msg.address == self.address {
            warn!(code = %msg.code, "Backlog from self");
            return;
        }
        let view = match msg.view() {
            Ok(view) => view,
            Err(_) => return,
        };
        trace!(from = %msg.address, code = %msg.code, ?view, "Store future message");
        self.backlog.push(view, msg);
    }

    fn process_backlog(&mut self) {
        let current = self.current.view();
        let waiting = self.waiting_for_round_change;
        let state = self.state;
        let ready = self
            .backlog
            .replay(|code, view| match check_view(code, view, current, waiting, state) {
                Ok(()) => Replay::Ready,
                Err(ConsensusError::FutureMessage) => Replay::Keep,
                Err(_) => Replay::Drop,
            });
        for msg in ready {
            self.enqueue(Event::Backlog(msg));
        }
    }

    fn process_pending_requests(&mut self) {
        let sequence = self.current.sequence();
        self.pending_requests.retain(|number, _| *number >= sequence);
        if let Some(block) = self.pending_requests.remove(&sequence) {
            trace!(sequence, "Replay pending request");
            self.enqueue(Event::Request(block));
        }
    }

    pub(crate) fn check_message(&self, code: MessageCode, view: View) -> Result<()> {
        check_view(
            code,
            view,
            self.current.view(),
            self.waiting_for_round_change,
            self.state,
        )
    }

    /// Sign and send a message, then feed it back to ourselves
    ///
    /// Prepares and commits only leave committee members.
    pub(crate) fn broadcast(&mut self, mut msg: Message) -> Result<()> {
        let code = msg.code;
        let prev_hash = self.current.prev_hash();
        let targets = match code {
            MessageCode::Prepare | MessageCode::Commit => {
                let committee = self.committee()?;
                if !committee.is_committee_member(&self.address) {
                    trace!(%code, "Not in committee, message not sent");
                    return Ok(());
                }
                let view = self.current.view();
                let next = self
                    .backend
                    .committee_state_by_round(view.sequence, view.round + 1)
                    .ok();
                Some(gossip_targets(&self.address, committee, next.as_ref()))
            }
            MessageCode::Preprepare | MessageCode::RoundChange => None,
        };

        msg.signature = self.backend.sign(&msg.signing_bytes())?;
        let payload = msg.to_bytes()?;
        match (code, targets) {
            (MessageCode::Preprepare, _) => self.backend.broadcast(prev_hash, payload.clone()),
            (_, Some(targets)) => self.backend.gossip_sub_peer(prev_hash, payload.clone(), &targets),
            (_, None) => self.backend.gossip(payload.clone()),
        }
        trace!(%code, view = ?self.current.view(), "Message sent");
        self.enqueue(Event::Message(payload));
        Ok(())
    }

    fn enqueue(&mut self, event: Event) {
        self.actions.push(Action::EnqueueInternal { event });
    }

    pub(crate) fn notify(&mut self, notification: EngineNotification) {
        self.actions.push(Action::Notify(notification));
    }

    pub(crate) fn is_proposer(&self) -> bool {
        self.committee
            .as_ref()
            .is_some_and(|c| c.is_proposer(&self.address))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn view(&self) -> View {
        self.current.view()
    }

    pub fn round_state(&self) -> &RoundState {
        &self.current
    }

    pub fn committee(&self) -> Result<&RoundCommitteeState> {
        self.committee.as_ref().ok_or(ConsensusError::NotStarted)
    }

    pub fn is_waiting_for_round_change(&self) -> bool {
        self.waiting_for_round_change
    }

    pub fn locked_hash(&self) -> Option<Hash> {
        self.current.locked_hash()
    }

    /// Round changes held for `round` of the current height
    pub fn round_change_count(&self, round: u64) -> usize {
        self.round_change_set.count(round)
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }
}

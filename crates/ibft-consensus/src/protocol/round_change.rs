use super::Core;
use crate::error::{ConsensusError, Result};
use crate::message::{Message, MessageCode, Subject};
use ibft_core::{Hash, View};
use tracing::{debug, warn};

impl Core {
    pub(crate) fn send_next_round_change(&mut self) -> Result<()> {
        self.send_round_change(self.current.round() + 1)
    }

    /// Move to `round` and ask the others to follow
    pub(crate) fn send_round_change(&mut self, round: u64) -> Result<()> {
        let current = self.current.view();
        if current.round >= round {
            warn!(current = ?current, target = round, "Cannot send out the round change");
            return Ok(());
        }

        self.catch_up_round(View::new(current.sequence, round))?;

        let subject = Subject {
            view: self.current.view(),
            digest: Hash::ZERO,
            prev_hash: self.current.prev_hash(),
        };
        debug!(view = ?subject.view, "Send round change");
        let msg = Message::subject(MessageCode::RoundChange, &subject, self.address)?;
        self.broadcast(msg)
    }

    pub(crate) fn handle_round_change(&mut self, msg: &Message) -> Result<()> {
        let rc = msg.decode_subject()?;
        self.check_message(MessageCode::RoundChange, rc.view)?;

        let current = self.current.view();
        let target = rc.view.round;
        let count = self.round_change_set.add(target, msg.clone())?;

        let committee = self.committee()?;
        let quorum = committee.required_message_count();
        let weak = committee.f() + 1;
        debug!(from = %msg.address, target, count, quorum, "Round change received");

        if count == quorum && (self.waiting_for_round_change || current.round < target) {
            return self.start_new_round(target);
        }
        // f+1 round changes prove at least one honest node moved on
        if self.waiting_for_round_change && count == weak {
            if current.round < target {
                return self.send_round_change(target);
            }
            return Ok(());
        }
        if current.round < target {
            return Err(ConsensusError::Ignored);
        }
        Ok(())
    }
}

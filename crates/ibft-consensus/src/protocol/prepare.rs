use super::Core;
use crate::error::{ConsensusError, Result};
use crate::message::{Message, MessageCode, Subject};
use crate::round_state::State;
use tracing::{debug, warn};

impl Core {
    pub(crate) fn send_prepare(&mut self) -> Result<()> {
        let Some(subject) = self.current.subject() else {
            return Ok(());
        };
        let msg = Message::subject(MessageCode::Prepare, &subject, self.address)?;
        self.broadcast(msg)
    }

    pub(crate) fn handle_prepare(&mut self, msg: &Message) -> Result<()> {
        let prepare = msg.decode_subject()?;
        self.check_message(MessageCode::Prepare, prepare.view)?;
        self.verify_subject(&prepare, msg)?;

        self.current.prepares_mut().add(msg.clone())?;

        let quorum = self.committee()?.required_message_count();
        let matches_lock = self.current.locked_hash() == Some(prepare.digest);
        if (matches_lock || self.current.prepare_or_commit_size() >= quorum)
            && self.state < State::Prepared
        {
            debug!(
                view = ?prepare.view,
                prepares = self.current.prepares().size(),
                quorum,
                "Prepare quorum reached"
            );
            self.current.lock_hash();
            self.set_state(State::Prepared);
            self.send_commit()?;
        }
        Ok(())
    }

    /// Prepares and commits must refer to the accepted proposal
    pub(crate) fn verify_subject(&self, subject: &Subject, msg: &Message) -> Result<()> {
        if self.current.subject() != Some(*subject) {
            warn!(
                from = %msg.address,
                code = %msg.code,
                digest = %subject.digest,
                "Inconsistent subject"
            );
            return Err(ConsensusError::InconsistentSubject);
        }
        Ok(())
    }
}

use super::Core;
use crate::error::{ConsensusError, Result};
use crate::event::{Action, EngineNotification, TimerId};
use crate::message::{Message, MessageCode};
use crate::round_state::State;
use ibft_core::commit_seal_data;
use tracing::{debug, info, warn};

impl Core {
    pub(crate) fn send_commit(&mut self) -> Result<()> {
        let Some(subject) = self.current.subject() else {
            return Ok(());
        };
        let mut msg = Message::subject(MessageCode::Commit, &subject, self.address)?;
        msg.committed_seal = self
            .backend
            .sign(&commit_seal_data(&subject.digest, subject.view.round))?;
        self.broadcast(msg)
    }

    pub(crate) fn handle_commit(&mut self, msg: &Message) -> Result<()> {
        let commit = msg.decode_subject()?;
        self.check_message(MessageCode::Commit, commit.view)?;
        self.verify_subject(&commit, msg)?;

        self.backend
            .check_signature(
                &commit_seal_data(&commit.digest, commit.view.round),
                msg.address,
                &msg.committed_seal,
            )
            .map_err(|_| ConsensusError::InvalidCommittedSeal)?;

        self.current.commits_mut().add(msg.clone())?;

        // enough commits decide the block even without a prepare quorum
        let quorum = self.committee()?.required_message_count();
        if self.current.commits().size() >= quorum && self.state < State::Committed {
            self.current.lock_hash();
            self.commit()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.set_state(State::Committed);
        self.actions.push(Action::CancelTimer {
            id: TimerId::RoundChange,
        });

        let Some(proposal) = self.current.proposal().cloned() else {
            return Ok(());
        };
        let seals: Vec<Vec<u8>> = self
            .current
            .commits()
            .values()
            .map(|m| m.committed_seal.clone())
            .collect();
        let seal_count = seals.len();
        let view = self.current.view();

        if let Err(err) = self.backend.commit(&proposal, view.round, seals) {
            warn!(number = proposal.number(), %err, "Commit failed");
            self.current.unlock_hash();
            return self.send_next_round_change();
        }

        info!(
            number = proposal.number(),
            hash = %proposal.hash(),
            round = view.round,
            seals = seal_count,
            "Committed"
        );
        debug!(backlog = self.backlog.len(), "Awaiting final committed");
        self.notify(EngineNotification::Committed {
            number: proposal.number(),
            hash: proposal.hash(),
            round: view.round,
            seals: seal_count,
        });
        Ok(())
    }
}

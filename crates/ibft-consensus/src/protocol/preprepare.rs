use super::Core;
use crate::error::{ConsensusError, Result, VerifyError};
use crate::event::{Action, Event, TimerId};
use crate::message::{Message, MessageCode, Preprepare, Subject};
use crate::round_state::State;
use ibft_core::{commit_seal_data, Address};
use tracing::{debug, warn};

impl Core {
    pub(crate) fn handle_preprepare(&mut self, msg: &Message) -> Result<()> {
        let preprepare = msg.decode_preprepare()?;
        if preprepare.proposal.number() != preprepare.view.sequence {
            return Err(ConsensusError::InvalidMessage(format!(
                "proposal {} in view {}",
                preprepare.proposal.number(),
                preprepare.view
            )));
        }

        if let Err(err) = self.check_message(MessageCode::Preprepare, preprepare.view) {
            // a proposer re-broadcasting a block we already hold gets our commit
            if err.is_old() && self.is_known_old_proposal(&preprepare, &msg.address) {
                return self.send_commit_for_old_block(&preprepare);
            }
            return Err(err);
        }

        if !self.committee()?.is_proposer(&msg.address) {
            warn!(from = %msg.address, view = ?preprepare.view, "Preprepare not from proposer");
            return Err(ConsensusError::NotFromProposer);
        }

        if let Err(err) = self.backend.verify(&preprepare.proposal) {
            return match err {
                VerifyError::FutureBlock(delay) => {
                    debug!(?delay, "Future proposal, retry later");
                    self.actions.push(Action::SetTimer {
                        id: TimerId::FuturePreprepare,
                        duration: delay,
                        event: Event::Backlog(msg.clone()),
                    });
                    Err(ConsensusError::FutureBlock(delay))
                }
                VerifyError::Invalid(reason) => {
                    warn!(view = ?preprepare.view, %reason, "Invalid proposal");
                    self.send_next_round_change()?;
                    Err(ConsensusError::Verification(reason))
                }
            };
        }

        if self.state != State::AcceptRequest {
            return Ok(());
        }
        match self.current.locked_hash() {
            Some(locked) if locked == preprepare.proposal.hash() => {
                // already prepared this value in an earlier round
                self.accept_preprepare(preprepare);
                self.set_state(State::Prepared);
                self.send_commit()
            }
            Some(locked) => {
                warn!(%locked, proposal = %preprepare.proposal.hash(), "Proposal conflicts with locked hash");
                self.send_next_round_change()
            }
            None => {
                self.accept_preprepare(preprepare);
                self.set_state(State::Preprepared);
                self.send_prepare()
            }
        }
    }

    fn accept_preprepare(&mut self, preprepare: Preprepare) {
        self.current.set_preprepare(preprepare);
    }

    fn is_known_old_proposal(&self, preprepare: &Preprepare, src: &Address) -> bool {
        let view = preprepare.view;
        let from_proposer = self
            .backend
            .committee_state_by_round(view.sequence, view.round)
            .is_ok_and(|state| state.is_proposer(src));
        from_proposer
            && self
                .backend
                .has_proposal(&preprepare.proposal.hash(), preprepare.proposal.number())
    }

    /// Commit for a block already on the chain; not fed back to ourselves
    fn send_commit_for_old_block(&mut self, preprepare: &Preprepare) -> Result<()> {
        let subject = Subject {
            view: preprepare.view,
            digest: preprepare.proposal.hash(),
            prev_hash: preprepare.proposal.parent_hash(),
        };
        let mut msg = Message::subject(MessageCode::Commit, &subject, self.address)?;
        msg.committed_seal = self
            .backend
            .sign(&commit_seal_data(&subject.digest, subject.view.round))?;
        msg.signature = self.backend.sign(&msg.signing_bytes())?;

        debug!(view = ?subject.view, hash = %subject.digest, "Send commit for old block");
        self.backend.gossip(msg.to_bytes()?);
        Ok(())
    }
}

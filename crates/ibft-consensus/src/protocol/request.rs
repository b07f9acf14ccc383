use super::Core;
use crate::error::{ConsensusError, Result};
use crate::message::{Message, Preprepare};
use crate::round_state::State;
use ibft_core::Block;
use std::cmp::Ordering;
use tracing::{debug, trace, warn};

impl Core {
    /// New proposal from the host
    ///
    /// Requests for a later height are held until that height starts.
    pub(crate) fn handle_request(&mut self, block: Block) -> Result<()> {
        let sequence = self.current.sequence();
        match block.number().cmp(&sequence) {
            Ordering::Less => {
                warn!(number = block.number(), sequence, "Old request");
                Err(ConsensusError::OldMessage)
            }
            Ordering::Greater => {
                trace!(number = block.number(), sequence, "Store future request");
                self.pending_requests.insert(block.number(), block);
                Ok(())
            }
            Ordering::Equal => {
                self.current.set_pending_request(block.clone());
                if self.state == State::AcceptRequest {
                    self.send_preprepare(block)?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn send_preprepare(&mut self, block: Block) -> Result<()> {
        if self.current.sequence() != block.number() || !self.is_proposer() {
            return Ok(());
        }
        let preprepare = Preprepare {
            view: self.current.view(),
            proposal: block,
        };
        debug!(
            view = ?preprepare.view,
            hash = %preprepare.proposal.hash(),
            "Send preprepare"
        );
        let msg = Message::preprepare(&preprepare, self.address)?;
        self.broadcast(msg)
    }
}

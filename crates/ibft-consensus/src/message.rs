//! Wire messages
//!
//! Every consensus message travels in a signed envelope:
//!
//! ```text
//!   Message { code, payload, address, signature, committed_seal }
//!
//!   code          payload
//!   ───────────   ─────────────────────────────
//!   Preprepare    Preprepare { view, proposal }
//!   Prepare       Subject { view, digest, prev_hash }
//!   Commit        Subject { view, digest, prev_hash }
//!   RoundChange   Subject { view, digest = 0, prev_hash }
//! ```
//!
//! The signature covers `H(code ‖ payload ‖ address ‖ committed_seal)`.

use crate::error::{ConsensusError, Result};
use ibft_core::{Address, Block, Hash, View, COMMIT_MSG_CODE};
use ibft_crypto::hash_concat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageCode {
    Preprepare,
    Prepare,
    Commit,
    RoundChange,
}

impl MessageCode {
    pub fn as_u8(&self) -> u8 {
        match self {
            MessageCode::Preprepare => 0,
            MessageCode::Prepare => 1,
            MessageCode::Commit => COMMIT_MSG_CODE,
            MessageCode::RoundChange => 3,
        }
    }

    /// Replay priority within one view; lower runs first
    pub fn priority(&self) -> u8 {
        match self {
            MessageCode::RoundChange => 0,
            MessageCode::Preprepare => 1,
            MessageCode::Commit => 2,
            MessageCode::Prepare => 3,
        }
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageCode::Preprepare => "preprepare",
            MessageCode::Prepare => "prepare",
            MessageCode::Commit => "commit",
            MessageCode::RoundChange => "roundchange",
        };
        f.write_str(name)
    }
}

/// Proposal announcement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preprepare {
    pub view: View,
    pub proposal: Block,
}

/// What a prepare, commit or round change refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub view: View,
    pub digest: Hash,
    pub prev_hash: Hash,
}

/// Signed envelope
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub code: MessageCode,
    pub payload: Vec<u8>,
    pub address: Address,
    pub signature: Vec<u8>,
    /// Committer signature over the block hash (commit messages only)
    pub committed_seal: Vec<u8>,
}

impl Message {
    /// Unsigned message from `address`
    pub fn new(code: MessageCode, payload: Vec<u8>, address: Address) -> Self {
        Self {
            code,
            payload,
            address,
            signature: Vec::new(),
            committed_seal: Vec::new(),
        }
    }

    pub fn preprepare(preprepare: &Preprepare, address: Address) -> Result<Self> {
        Ok(Self::new(
            MessageCode::Preprepare,
            bincode::serialize(preprepare)?,
            address,
        ))
    }

    pub fn subject(code: MessageCode, subject: &Subject, address: Address) -> Result<Self> {
        Ok(Self::new(code, bincode::serialize(subject)?, address))
    }

    /// Bytes covered by the envelope signature
    pub fn signing_bytes(&self) -> Vec<u8> {
        hash_concat(&[
            &[self.code.as_u8()],
            &(self.payload.len() as u64).to_le_bytes(),
            &self.payload,
            self.address.as_bytes(),
            &self.committed_seal,
        ])
        .as_bytes()
        .to_vec()
    }

    pub fn decode_preprepare(&self) -> Result<Preprepare> {
        if self.code != MessageCode::Preprepare {
            return Err(ConsensusError::InvalidMessage(format!(
                "expected preprepare, got {}",
                self.code
            )));
        }
        Ok(bincode::deserialize(&self.payload)?)
    }

    pub fn decode_subject(&self) -> Result<Subject> {
        if self.code == MessageCode::Preprepare {
            return Err(ConsensusError::InvalidMessage(
                "preprepare carries no subject".to_string(),
            ));
        }
        Ok(bincode::deserialize(&self.payload)?)
    }

    /// View the payload refers to
    pub fn view(&self) -> Result<View> {
        match self.code {
            MessageCode::Preprepare => Ok(self.decode_preprepare()?.view),
            _ => Ok(self.decode_subject()?.view),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

//! Consensus tuning parameters

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_request_timeout_ms() -> u64 {
    2_000
}

fn default_max_backoff_exponent() -> u32 {
    6
}

fn default_backlog_capacity() -> usize {
    1_024
}

fn default_signer_cache_capacity() -> usize {
    4_096
}

/// Consensus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Round-zero timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Cap on the timeout doubling
    #[serde(default = "default_max_backoff_exponent")]
    pub max_backoff_exponent: u32,

    /// Future messages kept for replay
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: usize,

    /// Memoised signer recoveries
    #[serde(default = "default_signer_cache_capacity")]
    pub signer_cache_capacity: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_backoff_exponent: default_max_backoff_exponent(),
            backlog_capacity: default_backlog_capacity(),
            signer_cache_capacity: default_signer_cache_capacity(),
        }
    }
}

impl ConsensusConfig {
    /// Round-change timeout: `base * 2^min(round, max_backoff_exponent)`
    pub fn round_timeout(&self, round: u64) -> Duration {
        let exponent = round.min(u64::from(self.max_backoff_exponent)) as u32;
        let base = Duration::from_millis(self.request_timeout_ms);
        base.saturating_mul(1u32 << exponent.min(31))
    }
}

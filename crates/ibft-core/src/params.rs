//! Protocol parameter enums shared by the committee, snapshot and node crates

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rule determining who proposes in each round
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposerPolicy {
    /// Rotate to the next validator after every block
    #[default]
    RoundRobin,

    /// Keep the last proposer until a round change
    Sticky,

    /// Stake-weighted permutation refreshed periodically
    WeightedRandom,
}

impl ProposerPolicy {
    /// Whether this policy uses the weighted council variant
    pub fn is_weighted(&self) -> bool {
        matches!(self, ProposerPolicy::WeightedRandom)
    }
}

impl fmt::Display for ProposerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProposerPolicy::RoundRobin => "roundrobin",
            ProposerPolicy::Sticky => "sticky",
            ProposerPolicy::WeightedRandom => "weightedrandom",
        };
        f.write_str(name)
    }
}

impl FromStr for ProposerPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "roundrobin" | "0" => Ok(ProposerPolicy::RoundRobin),
            "sticky" | "1" => Ok(ProposerPolicy::Sticky),
            "weightedrandom" | "2" => Ok(ProposerPolicy::WeightedRandom),
            other => Err(CoreError::UnknownValue(format!("proposer policy '{}'", other))),
        }
    }
}

/// How header-embedded governance votes are counted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GovernanceMode {
    /// Every validator vote takes effect immediately
    None,

    /// Only the governing node's votes count
    #[default]
    Single,

    /// A vote passes once more than half of the council cast it
    Ballot,
}

impl FromStr for GovernanceMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(GovernanceMode::None),
            "single" => Ok(GovernanceMode::Single),
            "ballot" => Ok(GovernanceMode::Ballot),
            other => Err(CoreError::UnknownValue(format!("governance mode '{}'", other))),
        }
    }
}

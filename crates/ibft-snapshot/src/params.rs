//! Governance parameters and the governance/staking collaborators

use ibft_core::{Address, GovernanceMode, ProposerPolicy, VoteAction};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_epoch() -> u64 {
    30_000
}

fn default_committee_size() -> u64 {
    21
}

fn default_update_interval() -> u64 {
    3_600
}

/// Effective protocol parameters at one height
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSet {
    /// Blocks per governance epoch
    #[serde(default = "default_epoch")]
    pub epoch: u64,

    #[serde(default)]
    pub policy: ProposerPolicy,

    #[serde(default = "default_committee_size")]
    pub committee_size: u64,

    /// Stake below which a weighted-council member is demoted
    #[serde(default)]
    pub minimum_stake: u64,

    /// Node whose votes count in single-governor mode
    #[serde(default)]
    pub governing_node: Option<Address>,

    #[serde(default)]
    pub governance_mode: GovernanceMode,

    /// Blocks between staking snapshots
    #[serde(default = "default_update_interval")]
    pub staking_update_interval: u64,

    /// Blocks between proposer permutation refreshes
    #[serde(default = "default_update_interval")]
    pub proposer_update_interval: u64,

    /// First block with beacon-driven proposers
    #[serde(default)]
    pub randao_fork_block: Option<u64>,

    /// First block applying minimum-stake demotion
    #[serde(default)]
    pub demotion_fork_block: Option<u64>,
}

impl Default for ParamSet {
    fn default() -> Self {
        Self {
            epoch: default_epoch(),
            policy: ProposerPolicy::default(),
            committee_size: default_committee_size(),
            minimum_stake: 0,
            governing_node: None,
            governance_mode: GovernanceMode::default(),
            staking_update_interval: default_update_interval(),
            proposer_update_interval: default_update_interval(),
            randao_fork_block: None,
            demotion_fork_block: None,
        }
    }
}

impl ParamSet {
    pub fn is_randao_active(&self, number: u64) -> bool {
        self.randao_fork_block.is_some_and(|fork| number >= fork)
    }

    pub fn is_demotion_active(&self, number: u64) -> bool {
        self.demotion_fork_block.is_some_and(|fork| number >= fork)
    }

    /// Staking boundary whose amounts apply at `number`
    pub fn staking_block(&self, number: u64) -> u64 {
        boundary(number, self.staking_update_interval)
    }

    pub fn is_proposer_update_block(&self, number: u64) -> bool {
        self.proposer_update_interval != 0 && number % self.proposer_update_interval == 0
    }
}

fn boundary(number: u64, interval: u64) -> u64 {
    if interval == 0 {
        return 0;
    }
    number - number % interval
}

/// Parameter values changed by passed governance votes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamOverrides {
    pub committee_size: Option<u64>,
    pub policy: Option<ProposerPolicy>,
    pub minimum_stake: Option<u64>,
}

impl ParamOverrides {
    /// Record a parameter action; membership actions are ignored
    pub fn set(&mut self, action: &VoteAction) {
        match action {
            VoteAction::CommitteeSize(size) => self.committee_size = Some(*size),
            VoteAction::ProposerPolicy(policy) => self.policy = Some(*policy),
            VoteAction::MinimumStake(stake) => self.minimum_stake = Some(*stake),
            VoteAction::AddValidator(_) | VoteAction::RemoveValidator(_) => {}
        }
    }

    /// Fold newer overrides on top of these
    pub fn merge(&mut self, newer: &ParamOverrides) {
        self.committee_size = newer.committee_size.or(self.committee_size);
        self.policy = newer.policy.or(self.policy);
        self.minimum_stake = newer.minimum_stake.or(self.minimum_stake);
    }

    pub fn apply_to(&self, params: &mut ParamSet) {
        if let Some(size) = self.committee_size {
            params.committee_size = size;
        }
        if let Some(policy) = self.policy {
            params.policy = policy;
        }
        if let Some(stake) = self.minimum_stake {
            params.minimum_stake = stake;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.committee_size.is_none() && self.policy.is_none() && self.minimum_stake.is_none()
    }
}

/// Source of effective governance parameters
pub trait GovernanceReader: Send + Sync {
    fn effective_params(&self, height: u64) -> ParamSet;
}

/// Staked amounts at one block
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingInfo {
    pub block_number: u64,
    pub amounts: BTreeMap<Address, u64>,
}

/// Source of staking amounts
pub trait StakingReader: Send + Sync {
    fn staking_info(&self, height: u64) -> Option<StakingInfo>;
}

/// Governance that never changes outside header votes
#[derive(Clone, Debug, Default)]
pub struct StaticGovernance {
    params: ParamSet,
}

impl StaticGovernance {
    pub fn new(params: ParamSet) -> Self {
        Self { params }
    }
}

impl GovernanceReader for StaticGovernance {
    fn effective_params(&self, _height: u64) -> ParamSet {
        self.params.clone()
    }
}

/// In-memory staking history
///
/// Lookups return the latest entry at or below the requested height.
#[derive(Debug, Default)]
pub struct StaticStaking {
    history: RwLock<BTreeMap<u64, StakingInfo>>,
}

impl StaticStaking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same amounts at every height
    pub fn constant(amounts: BTreeMap<Address, u64>) -> Self {
        let staking = Self::new();
        staking.insert(StakingInfo {
            block_number: 0,
            amounts,
        });
        staking
    }

    pub fn insert(&self, info: StakingInfo) {
        self.history.write().insert(info.block_number, info);
    }
}

impl StakingReader for StaticStaking {
    fn staking_info(&self, height: u64) -> Option<StakingInfo> {
        self.history
            .read()
            .range(..=height)
            .next_back()
            .map(|(_, info)| info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_activation() {
        let params = ParamSet {
            randao_fork_block: Some(10),
            ..Default::default()
        };
        assert!(!params.is_randao_active(9));
        assert!(params.is_randao_active(10));
        assert!(!params.is_demotion_active(u64::MAX));
    }

    #[test]
    fn test_staking_boundary() {
        let params = ParamSet {
            staking_update_interval: 100,
            ..Default::default()
        };
        assert_eq!(params.staking_block(0), 0);
        assert_eq!(params.staking_block(199), 100);
        assert_eq!(params.staking_block(200), 200);
    }

    #[test]
    fn test_overrides_merge() {
        let mut current = ParamOverrides::default();
        current.set(&VoteAction::CommitteeSize(7));
        let mut newer = ParamOverrides::default();
        newer.set(&VoteAction::MinimumStake(5));
        current.merge(&newer);

        let mut params = ParamSet::default();
        current.apply_to(&mut params);
        assert_eq!(params.committee_size, 7);
        assert_eq!(params.minimum_stake, 5);
    }

    #[test]
    fn test_staking_history_lookup() {
        let staking = StaticStaking::new();
        staking.insert(StakingInfo {
            block_number: 100,
            amounts: BTreeMap::new(),
        });
        assert!(staking.staking_info(99).is_none());
        assert_eq!(staking.staking_info(150).unwrap().block_number, 100);
    }
}

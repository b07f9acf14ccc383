//! Validator-set snapshot and header replay
//!
//! ## Per-header replay
//!
//! ```text
//!   1. recover the seal signer, require council membership
//!   2. epoch boundary: fold passed parameter votes, clear the tally
//!   3. resolve effective params for number + 1
//!   4. count the header's vote, apply it if it passed
//!   5. weighted policy: refresh stakes, weights, demotion and
//!      (at proposer-update blocks, without a beacon) the proposer list
//! ```
//!
//! `apply` never mutates `self`; it returns the next snapshot.

use crate::error::{Result, SnapshotError};
use crate::params::{GovernanceReader, ParamOverrides, ParamSet, StakingReader};
use crate::tally::VoteTally;
use ibft_committee::{calc_demoted, ValidatorSet};
use ibft_core::{BlockHeader, Hash, VoteAction};
use ibft_crypto::SignerCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Collaborators used while replaying headers
#[derive(Clone, Copy)]
pub struct ApplyContext<'a> {
    pub governance: &'a dyn GovernanceReader,
    pub staking: &'a dyn StakingReader,
    pub signers: &'a SignerCache,
}

impl<'a> ApplyContext<'a> {
    pub fn new(
        governance: &'a dyn GovernanceReader,
        staking: &'a dyn StakingReader,
        signers: &'a SignerCache,
    ) -> Self {
        Self {
            governance,
            staking,
            signers,
        }
    }
}

/// Validator-set state as of one committed block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Epoch length in effect
    pub epoch: u64,

    /// Block number
    pub number: u64,

    /// Block hash
    pub hash: Hash,

    pub validators: ValidatorSet,

    /// Outstanding ballot votes
    pub tally: VoteTally,

    /// Passed parameter votes awaiting the next epoch boundary
    pub pending: ParamOverrides,

    /// Parameter votes already in effect
    pub overrides: ParamOverrides,

    /// Beacon output of this block
    pub mix_hash: Option<Hash>,
}

impl Snapshot {
    /// Snapshot of the genesis block
    pub fn genesis(header: &BlockHeader, ctx: &ApplyContext<'_>) -> Result<Self> {
        if header.extra.validators.is_empty() {
            return Err(SnapshotError::EmptyGenesis);
        }

        let params = ctx.governance.effective_params(header.number + 1);
        let validators = ValidatorSet::new(
            header.extra.validators.clone(),
            params.policy,
            params.committee_size,
        );
        let hash = header.hash();
        let validators = refresh_weighted(validators, header.number, hash, &params, ctx, true);

        Ok(Self {
            epoch: params.epoch.max(1),
            number: header.number,
            hash,
            validators,
            tally: VoteTally::new(),
            pending: ParamOverrides::default(),
            overrides: ParamOverrides::default(),
            mix_hash: header.mix_hash,
        })
    }

    /// Effective parameters for `number`, including passed votes
    pub fn params_at(&self, ctx: &ApplyContext<'_>, number: u64) -> ParamSet {
        let mut params = ctx.governance.effective_params(number);
        self.overrides.apply_to(&mut params);
        params.epoch = params.epoch.max(1);
        params
    }

    /// Replay contiguous headers on top of this snapshot
    pub fn apply(&self, headers: &[BlockHeader], ctx: &ApplyContext<'_>) -> Result<Snapshot> {
        let mut expected = self.number + 1;
        for header in headers {
            if header.number != expected {
                return Err(SnapshotError::InvalidVotingChain {
                    expected,
                    actual: header.number,
                });
            }
            expected += 1;
        }

        let mut snap = self.clone();
        for header in headers {
            snap.apply_header(header, ctx)?;
        }
        Ok(snap)
    }

    fn apply_header(&mut self, header: &BlockHeader, ctx: &ApplyContext<'_>) -> Result<()> {
        let number = header.number;

        let signer = ctx
            .signers
            .recover(header.seal_hash().as_bytes(), &header.extra.seal)?;
        if !self.validators.is_council_member(&signer) {
            return Err(SnapshotError::Unauthorized { signer, number });
        }

        if number % self.epoch == 0 {
            let pending = std::mem::take(&mut self.pending);
            self.overrides.merge(&pending);
            self.tally.clear();
            debug!(number, "Epoch boundary, votes cleared");
        }

        let params = self.params_at(ctx, number + 1);
        self.epoch = params.epoch;
        self.validators = self
            .validators
            .with_policy(params.policy)
            .with_committee_size(params.committee_size);

        if let Some(vote) = &header.extra.vote {
            if vote.voter == signer {
                self.apply_vote(vote, &params, number);
            } else {
                debug!(number, %signer, voter = %vote.voter, "Ignoring vote not cast by sealer");
            }
        }

        let hash = header.hash();
        let refresh_proposers =
            params.is_proposer_update_block(number) && !params.is_randao_active(number + 1);
        self.validators = refresh_weighted(
            self.validators.clone(),
            number,
            hash,
            &params,
            ctx,
            refresh_proposers,
        );

        self.number = number;
        self.hash = hash;
        self.mix_hash = header.mix_hash;
        Ok(())
    }

    fn apply_vote(&mut self, vote: &ibft_core::GovernanceVote, params: &ParamSet, number: u64) {
        // membership votes that would be no-ops are not counted
        match &vote.action {
            VoteAction::AddValidator(addr) if self.validators.is_council_member(addr) => return,
            VoteAction::RemoveValidator(addr)
                if !self.validators.is_council_member(addr) || self.validators.len() <= 1 =>
            {
                return
            }
            _ => {}
        }

        let passed = self.tally.cast(
            vote,
            self.validators.len(),
            params.governance_mode,
            params.governing_node,
        );
        let Some(action) = passed else {
            return;
        };

        match &action {
            VoteAction::AddValidator(addr) => {
                self.validators = self.validators.with_added(*addr);
                info!(number, validator = %addr, "Validator added");
            }
            VoteAction::RemoveValidator(addr) => {
                self.validators = self.validators.with_removed(addr);
                self.tally.forget_voter(addr);
                info!(number, validator = %addr, "Validator removed");
            }
            param => {
                self.pending.set(param);
                info!(number, action = ?param, "Parameter vote passed");
            }
        }
    }

    /// Effective parameters pending activation plus those in effect
    pub fn effective_overrides(&self) -> ParamOverrides {
        let mut all = self.overrides.clone();
        all.merge(&self.pending);
        all
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Refresh stake-derived state of a weighted council
fn refresh_weighted(
    validators: ValidatorSet,
    number: u64,
    hash: Hash,
    params: &ParamSet,
    ctx: &ApplyContext<'_>,
    refresh_proposers: bool,
) -> ValidatorSet {
    if !params.policy.is_weighted() {
        return validators;
    }

    let mut validators = validators;
    if let Some(info) = ctx.staking.staking_info(params.staking_block(number)) {
        validators = validators.with_stakes(&info.amounts);
        let demoted = if params.is_demotion_active(number + 1) {
            calc_demoted(
                validators.council(),
                &info.amounts,
                params.minimum_stake,
                params.governing_node,
            )
        } else {
            BTreeSet::new()
        };
        validators = validators.with_demoted(&demoted);
    }

    if refresh_proposers {
        validators = validators.with_refreshed_proposers(hash, number);
    }
    validators
}

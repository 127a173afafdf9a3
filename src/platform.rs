//! The registry platform: batch storage, both governance mechanisms, the
//! contributor registry and the membership verifier behind one operation
//! surface.
//!
//! Each public method is one transaction. All preconditions are checked
//! before the first mutation, and the mutations that follow cannot fail, so
//! an `Err` always leaves every component unchanged.

use crate::clock::Clock;
use crate::config::Config;
use crate::contributor::{AccessLevel, AnonymousContributor, Contributor, ContributorRegistry, StakeTier};
use crate::contributor_tree::TreeRebuilder;
use crate::error::{RegistryError, RegistryResult};
use crate::governance::{AdminChange, AdminSet, ApprovalStatus, GovernanceEvent, ThresholdGovernance};
use crate::membership::{ContributorMembershipTree, RootEntry};
use crate::registry::BatchRegistry;
use crate::types::{Batch, Commitment, FieldBytes, PlatformStats, ProofElements, PublicSignals};
use crate::utils::{field_from_word, field_to_word};
use crate::verifier::{Groth16Verifier, ZkMembershipVerifier};
use crate::voting::{Proposal, ProposalState, VotingGovernance};
use anyhow::{Context, Result};
use ark_bn254::Fr;
use ethers::types::{Address, U256};
use log::{info, warn};
use std::sync::Arc;

pub struct CtiPlatform {
    clock: Arc<dyn Clock>,
    batches: BatchRegistry,
    governance: ThresholdGovernance,
    voting: Option<VotingGovernance>,
    contributors: ContributorRegistry,
    roots: ContributorMembershipTree,
    verifier: ZkMembershipVerifier,
}

fn log_refusal<T>(operation: &str, result: RegistryResult<T>) -> RegistryResult<T> {
    if let Err(e) = &result {
        warn!("{operation} refused ({}): {e}", e.kind());
    }
    result
}

impl CtiPlatform {
    pub fn new(
        governance: ThresholdGovernance,
        voting: Option<VotingGovernance>,
        roots: ContributorMembershipTree,
        backend: Box<dyn Groth16Verifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            "Platform started: {} admins, threshold {}, root window {}, voting {}",
            governance.admins().admin_count(),
            governance.threshold(),
            roots.capacity(),
            if voting.is_some() { "enabled" } else { "disabled" }
        );
        Self {
            clock,
            batches: BatchRegistry::new(),
            governance,
            voting,
            contributors: ContributorRegistry::new(),
            roots,
            verifier: ZkMembershipVerifier::new(backend),
        }
    }

    /// Builds a platform from a validated configuration.
    pub fn from_config(
        config: &Config,
        backend: Box<dyn Groth16Verifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let gov = &config.governance;
        let admins = AdminSet::new(gov.admin_addresses()?, gov.threshold, gov.admin_policy)
            .context("Invalid admin set")?;
        let voting = gov
            .voting_enabled
            .then(|| VotingGovernance::new(gov.voting_period_secs));
        let roots = ContributorMembershipTree::new(config.membership.root_window_size)
            .context("Invalid root window")?;

        Ok(Self::new(
            ThresholdGovernance::new(admins, gov.approval_timeout_secs),
            voting,
            roots,
            backend,
            clock,
        ))
    }

    fn now(&self) -> u64 {
        self.clock.now()
    }

    // ---- contributors ----

    /// Registers `caller` with the attached stake `value`.
    pub fn register_contributor(&mut self, caller: Address, value: U256) -> RegistryResult<StakeTier> {
        let now = self.now();
        log_refusal("register_contributor", self.contributors.register(caller, value, now))
    }

    pub fn register_anonymous_contributor(
        &mut self,
        commitment: Commitment,
        value: U256,
    ) -> RegistryResult<StakeTier> {
        let now = self.now();
        log_refusal(
            "register_anonymous_contributor",
            self.contributors.register_anonymous(commitment, value, now),
        )
    }

    #[must_use]
    pub fn get_contributor(&self, address: &Address) -> Option<&Contributor> {
        self.contributors.get(address)
    }

    #[must_use]
    pub fn get_anonymous_contributor(&self, commitment: &Commitment) -> Option<&AnonymousContributor> {
        self.contributors.get_anonymous(commitment)
    }

    #[must_use]
    pub fn access_level(&self, address: &Address) -> Option<AccessLevel> {
        self.contributors.access_level(address)
    }

    // ---- batches ----

    /// Submits a public batch from an active contributor.
    pub fn add_batch(&mut self, caller: Address, cid: &str, integrity_root: FieldBytes) -> RegistryResult<u64> {
        let result = self.contributors.ensure_active(&caller).and_then(|()| {
            let now = self.now();
            let batch_id = self.batches.push_public(cid, integrity_root, caller, now)?;
            self.open_batch(batch_id, now);
            Ok(batch_id)
        });
        log_refusal("add_batch", result)
    }

    /// Submits an anonymous batch backed by a membership proof.
    ///
    /// `membership_root` is the contributor root the proof was generated
    /// against; it must still be inside the validity window.
    pub fn add_privacy_batch(
        &mut self,
        cid: &str,
        integrity_root: FieldBytes,
        tier: StakeTier,
        commitment: Commitment,
        proof: &ProofElements,
        membership_root: FieldBytes,
    ) -> RegistryResult<u64> {
        let signals = PublicSignals {
            root: membership_root,
            commitment,
        };
        let result = self
            .batches
            .ensure_commitment_unused(&commitment)
            .and_then(|()| self.verifier.check(&self.roots, proof, &signals))
            .and_then(|()| {
                let now = self.now();
                let batch_id = self
                    .batches
                    .push_anonymous(cid, integrity_root, commitment, tier, now)?;
                self.open_batch(batch_id, now);
                Ok(batch_id)
            });
        log_refusal("add_privacy_batch", result)
    }

    fn open_batch(&mut self, batch_id: u64, now: u64) {
        if let Ok(batch) = self.batches.get_batch(batch_id) {
            let submitter = batch.submitter;
            self.contributors.record_submission(&submitter);
        }
        self.governance.open_record(batch_id, now);
    }

    pub fn get_batch(&self, batch_id: u64) -> RegistryResult<&Batch> {
        self.batches.get_batch(batch_id)
    }

    #[must_use]
    pub fn get_batch_count(&self) -> u64 {
        self.batches.batch_count()
    }

    /// Records a confirmation from an active contributor.
    pub fn confirm_batch(&mut self, caller: Address, batch_id: u64) -> RegistryResult<()> {
        self.review(caller, batch_id, true)
    }

    /// Records a dispute from an active contributor.
    pub fn dispute_batch(&mut self, caller: Address, batch_id: u64) -> RegistryResult<()> {
        self.review(caller, batch_id, false)
    }

    fn review(&mut self, caller: Address, batch_id: u64, confirm: bool) -> RegistryResult<()> {
        let result = self
            .contributors
            .ensure_active(&caller)
            .and_then(|()| self.batches.review(caller, batch_id, confirm));
        log_refusal(if confirm { "confirm_batch" } else { "dispute_batch" }, result)
    }

    /// Checks that `leaf` is part of the dataset committed by the batch.
    pub fn verify_ioc(&self, batch_id: u64, leaf: &FieldBytes, siblings: &[FieldBytes]) -> RegistryResult<bool> {
        self.batches.verify_ioc(batch_id, leaf, siblings)
    }

    #[must_use]
    pub fn get_platform_stats(&self) -> PlatformStats {
        PlatformStats {
            total_batches: self.batches.batch_count(),
            accepted_batches: self.batches.accepted_count(),
            public_batches: self.batches.public_count(),
            anonymous_batches: self.batches.anonymous_count(),
            public_contributors: self.contributors.public_count(),
            anonymous_contributors: self.contributors.anonymous_count(),
            total_staked: self.contributors.total_staked().to_string(),
        }
    }

    // ---- threshold governance ----

    fn accept(&mut self, batch_id: u64) -> RegistryResult<()> {
        if self.batches.mark_accepted(batch_id)? {
            let submitter = self.batches.get_batch(batch_id)?.submitter;
            self.contributors
                .apply_outcome(&GovernanceEvent::BatchAccepted { batch_id, submitter });
        }
        Ok(())
    }

    /// Adds the caller's approval; the approval that reaches the threshold
    /// also accepts the batch.
    pub fn approve_batch(&mut self, caller: Address, batch_id: u64) -> RegistryResult<ApprovalStatus> {
        let now = self.now();
        let result = self.batches.get_batch(batch_id).map(|_| ()).and_then(|()| {
            let (status, executed) = self.governance.approve_batch(caller, batch_id, now)?;
            if executed {
                self.accept(batch_id)?;
            }
            Ok(status)
        });
        log_refusal("approve_batch", result)
    }

    /// Rejects a batch whose approval window closed without execution.
    pub fn reject_batch(&mut self, caller: Address, batch_id: u64) -> RegistryResult<()> {
        let now = self.now();
        let result = self.batches.get_batch(batch_id).map(|b| b.submitter).and_then(|submitter| {
            self.governance.reject_batch(caller, batch_id, now)?;
            self.contributors
                .apply_outcome(&GovernanceEvent::BatchRejected { batch_id, submitter });
            Ok(())
        });
        log_refusal("reject_batch", result)
    }

    pub fn add_admin(&mut self, caller: Address, candidate: Address) -> RegistryResult<AdminChange> {
        log_refusal("add_admin", self.governance.add_admin(caller, candidate))
    }

    #[must_use]
    pub fn is_admin(&self, address: &Address) -> bool {
        self.governance.is_admin(address)
    }

    #[must_use]
    pub fn get_batch_approval_status(&self, batch_id: u64) -> Option<ApprovalStatus> {
        self.governance.get_batch_approval_status(batch_id)
    }

    #[must_use]
    pub fn has_approved(&self, admin: &Address, batch_id: u64) -> bool {
        self.governance.has_approved(admin, batch_id)
    }

    #[must_use]
    pub fn governance(&self) -> &ThresholdGovernance {
        &self.governance
    }

    // ---- voting governance ----

    fn voting_mut(&mut self) -> RegistryResult<&mut VotingGovernance> {
        self.voting
            .as_mut()
            .ok_or_else(|| RegistryError::Unauthorized("proposal voting is disabled".to_string()))
    }

    /// Opens a proposal to accept a pending batch.
    pub fn create_proposal(&mut self, caller: Address, batch_id: u64) -> RegistryResult<u64> {
        let now = self.now();
        let result = self.batches.get_batch(batch_id).map(|b| b.accepted).and_then(|accepted| {
            if accepted {
                return Err(RegistryError::AlreadyExecuted(batch_id));
            }
            if self.governance.record(batch_id).is_some_and(|r| r.rejected) {
                return Err(RegistryError::AlreadyRejected(batch_id));
            }
            let members = self.governance.admins();
            match self.voting.as_mut() {
                Some(voting) => voting.create_proposal(members, caller, batch_id, now),
                None => Err(RegistryError::Unauthorized("proposal voting is disabled".to_string())),
            }
        });
        log_refusal("create_proposal", result)
    }

    pub fn vote(&mut self, caller: Address, proposal_id: u64, support: bool) -> RegistryResult<()> {
        let now = self.now();
        let members = self.governance.admins();
        let result = match self.voting.as_mut() {
            Some(voting) => voting.vote(members, caller, proposal_id, support, now),
            None => Err(RegistryError::Unauthorized("proposal voting is disabled".to_string())),
        };
        log_refusal("vote", result)
    }

    /// Closes a proposal once its period has elapsed; a passing proposal
    /// accepts its batch. A batch rejected while the vote was open stays
    /// rejected and its proposal cannot be finalized.
    pub fn finalize_proposal(&mut self, proposal_id: u64) -> RegistryResult<ProposalState> {
        let now = self.now();
        let rejected_batch = self
            .get_proposal(proposal_id)
            .map(|p| p.batch_id)
            .filter(|id| self.governance.record(*id).is_some_and(|r| r.rejected));
        let result = match rejected_batch {
            Some(batch_id) => Err(RegistryError::AlreadyRejected(batch_id)),
            None => self.voting_mut().and_then(|voting| {
                let proposal = voting.finalize_proposal(proposal_id, now)?;
                Ok((proposal.state, proposal.batch_id))
            }),
        };
        let (state, batch_id) = log_refusal("finalize_proposal", result)?;

        if state == ProposalState::Passed {
            self.accept(batch_id)?;
            self.governance.mark_executed(batch_id);
        }
        Ok(state)
    }

    #[must_use]
    pub fn get_proposal(&self, proposal_id: u64) -> Option<&Proposal> {
        self.voting.as_ref().and_then(|v| v.get_proposal(proposal_id))
    }

    // ---- membership roots and verifier ----

    /// Installs a new contributor root. Admin-only.
    pub fn update_merkle_root(&mut self, caller: Address, root: FieldBytes) -> RegistryResult<Option<RootEntry>> {
        let now = self.now();
        let result = self
            .governance
            .admins()
            .ensure_admin(&caller)
            .and_then(|()| field_from_word::<Fr>(&root, "membership root").map(|_| ()))
            .map(|()| self.roots.update_merkle_root(root, now));
        log_refusal("update_merkle_root", result)
    }

    /// Rebuilds the contributor tree from the active contributors and
    /// installs its root when it changed. Admin-only.
    pub fn sync_membership_root(
        &mut self,
        caller: Address,
        rebuilder: &mut TreeRebuilder,
    ) -> RegistryResult<Option<FieldBytes>> {
        self.governance.admins().ensure_admin(&caller)?;
        let now = self.now();
        let addresses = self.contributors.active_addresses();
        match rebuilder.rebuild(&addresses, now)? {
            Some(root) => {
                let word = field_to_word(root);
                self.roots.update_merkle_root(word, now);
                Ok(Some(word))
            }
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn is_root_valid(&self, root: &FieldBytes) -> bool {
        self.roots.is_root_valid(root)
    }

    #[must_use]
    pub fn current_root(&self) -> Option<FieldBytes> {
        self.roots.current_root()
    }

    #[must_use]
    pub fn valid_roots(&self) -> Vec<RootEntry> {
        self.roots.valid_roots()
    }

    /// Replaces the Groth16 backend. Admin-only.
    pub fn set_zk_verifier(&mut self, caller: Address, backend: Box<dyn Groth16Verifier>) -> RegistryResult<()> {
        let result = self.governance.admins().ensure_admin(&caller);
        if result.is_ok() {
            self.verifier.set_backend(backend);
            info!("Groth16 verifier replaced by {caller:?}");
        }
        log_refusal("set_zk_verifier", result)
    }

    #[must_use]
    pub fn zk_verifier_description(&self) -> String {
        self.verifier.backend_description()
    }

    /// Runs the membership check alone, without submitting anything.
    pub fn verify_membership(&self, proof: &ProofElements, signals: &PublicSignals) -> RegistryResult<()> {
        self.verifier.check(&self.roots, proof, signals)
    }
}

//! Content-addressed batch storage.
//!
//! Batches are append-only. The only transitions are the one-way `accepted`
//! flag and the community review counters. Aggregate counters are kept
//! alongside the batches so stats reads never walk the history.

use crate::contributor::StakeTier;
use crate::error::{RegistryError, RegistryResult};
use crate::merkle::verify_sorted_pair_path;
use crate::types::{Batch, Commitment, FieldBytes, Submitter, Visibility};
use ethers::types::Address;
use log::{debug, info};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct BatchRegistry {
    batches: Vec<Batch>,
    accepted_count: u64,
    public_count: u64,
    anonymous_count: u64,
    used_commitments: HashSet<Commitment>,
    reviewers: HashMap<u64, HashSet<Address>>,
}

impl BatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_cid(cid: &str) -> RegistryResult<()> {
        if cid.trim().is_empty() {
            return Err(RegistryError::MalformedInput("empty content identifier".to_string()));
        }
        Ok(())
    }

    fn push(&mut self, cid: &str, integrity_root: FieldBytes, submitter: Submitter, now: u64) -> u64 {
        let index = self.batches.len() as u64;
        match submitter.visibility() {
            Visibility::Public => self.public_count += 1,
            Visibility::Anonymous => self.anonymous_count += 1,
        }
        self.batches.push(Batch {
            index,
            cid: cid.to_string(),
            integrity_root,
            timestamp: now,
            accepted: false,
            submitter,
            confirmations: 0,
            disputes: 0,
        });
        index
    }

    /// Appends a public batch. Contributor activity is checked by the caller.
    pub fn push_public(
        &mut self,
        cid: &str,
        integrity_root: FieldBytes,
        submitter: Address,
        now: u64,
    ) -> RegistryResult<u64> {
        Self::validate_cid(cid)?;
        let index = self.push(cid, integrity_root, Submitter::Public(submitter), now);
        info!("Public batch {index} stored ({cid}) by {submitter:?}");
        Ok(index)
    }

    /// Fails with `CommitmentAlreadyUsed` if `commitment` already backs a batch.
    pub fn ensure_commitment_unused(&self, commitment: &Commitment) -> RegistryResult<()> {
        if self.is_commitment_used(commitment) {
            return Err(RegistryError::CommitmentAlreadyUsed(commitment.to_string()));
        }
        Ok(())
    }

    /// Appends an anonymous batch. The membership proof is verified by the
    /// caller before this is reached.
    pub fn push_anonymous(
        &mut self,
        cid: &str,
        integrity_root: FieldBytes,
        commitment: Commitment,
        tier: StakeTier,
        now: u64,
    ) -> RegistryResult<u64> {
        Self::validate_cid(cid)?;
        self.ensure_commitment_unused(&commitment)?;

        self.used_commitments.insert(commitment);
        let index = self.push(cid, integrity_root, Submitter::Anonymous { commitment, tier }, now);
        info!("Anonymous batch {index} stored ({cid}) at tier {tier:?}");
        Ok(index)
    }

    pub fn get_batch(&self, batch_id: u64) -> RegistryResult<&Batch> {
        usize::try_from(batch_id)
            .ok()
            .and_then(|i| self.batches.get(i))
            .ok_or_else(|| RegistryError::batch_not_found(batch_id))
    }

    /// Flips `accepted`. Returns false when the batch was already accepted.
    pub fn mark_accepted(&mut self, batch_id: u64) -> RegistryResult<bool> {
        let batch = usize::try_from(batch_id)
            .ok()
            .and_then(|i| self.batches.get_mut(i))
            .ok_or_else(|| RegistryError::batch_not_found(batch_id))?;
        if batch.accepted {
            debug!("Batch {batch_id} already accepted");
            return Ok(false);
        }
        batch.accepted = true;
        self.accepted_count += 1;
        info!("Batch {batch_id} accepted");
        Ok(true)
    }

    /// Records a confirmation or dispute from `reviewer`, once per batch.
    pub fn review(&mut self, reviewer: Address, batch_id: u64, confirm: bool) -> RegistryResult<()> {
        let batch = usize::try_from(batch_id)
            .ok()
            .and_then(|i| self.batches.get_mut(i))
            .ok_or_else(|| RegistryError::batch_not_found(batch_id))?;
        let reviewed = self.reviewers.entry(batch_id).or_default();
        if reviewed.contains(&reviewer) {
            return Err(RegistryError::AlreadyReviewed {
                batch_id,
                reviewer: format!("{reviewer:?}"),
            });
        }

        reviewed.insert(reviewer);
        if confirm {
            batch.confirmations += 1;
        } else {
            batch.disputes += 1;
        }
        info!(
            "Batch {batch_id} {} by {reviewer:?}",
            if confirm { "confirmed" } else { "disputed" }
        );
        Ok(())
    }

    /// Checks an integrity-tree inclusion proof against the stored root.
    pub fn verify_ioc(
        &self,
        batch_id: u64,
        leaf: &FieldBytes,
        siblings: &[FieldBytes],
    ) -> RegistryResult<bool> {
        let batch = self.get_batch(batch_id)?;
        let ok = verify_sorted_pair_path(&batch.integrity_root, leaf, siblings);
        debug!("IOC proof for batch {batch_id}: {}", if ok { "valid" } else { "invalid" });
        Ok(ok)
    }

    #[must_use]
    pub fn batch_count(&self) -> u64 {
        self.batches.len() as u64
    }

    #[must_use]
    pub fn accepted_count(&self) -> u64 {
        self.accepted_count
    }

    #[must_use]
    pub fn public_count(&self) -> u64 {
        self.public_count
    }

    #[must_use]
    pub fn anonymous_count(&self) -> u64 {
        self.anonymous_count
    }

    #[must_use]
    pub fn is_commitment_used(&self, commitment: &Commitment) -> bool {
        self.used_commitments.contains(commitment)
    }
}

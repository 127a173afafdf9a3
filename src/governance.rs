//! K-of-N admin governance over batch acceptance.
//!
//! Each submitted batch gets an [`ApprovalRecord`]. Admins approve it one at a
//! time; the approval that first brings the count to the threshold executes
//! the record. Records that are still unexecuted when their deadline passes
//! can be rejected by any admin.
//!
//! Every mutating method validates all of its preconditions before touching
//! state, so a returned error means nothing changed.

use crate::error::{RegistryError, RegistryResult};
use crate::types::Submitter;
use ethers::types::Address;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// How `add_admin` is authorized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminPolicy {
    /// Any existing admin adds a new one directly.
    #[default]
    SingleAdmin,
    /// A candidate joins once `threshold` distinct admins nominate it.
    Quorum,
}

/// Outcome of a batch, consumed by the contributor registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernanceEvent {
    BatchAccepted { batch_id: u64, submitter: Submitter },
    BatchRejected { batch_id: u64, submitter: Submitter },
}

/// Result of a successful `add_admin` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminChange {
    Added,
    /// Quorum policy: nominations recorded so far for the candidate.
    Pending(usize),
}

fn unauthorized_admin(caller: &Address) -> RegistryError {
    RegistryError::Unauthorized(format!("{caller:?} is not an admin"))
}

/// Admin membership shared by both governance mechanisms.
#[derive(Debug, Clone)]
pub struct AdminSet {
    admins: HashSet<Address>,
    threshold: usize,
    policy: AdminPolicy,
    nominations: HashMap<Address, BTreeSet<Address>>,
}

impl AdminSet {
    /// # Errors
    ///
    /// `InvalidConfig` when `admins` is empty or has duplicates, or when
    /// `threshold` is zero or exceeds the admin count.
    pub fn new(admins: Vec<Address>, threshold: usize, policy: AdminPolicy) -> RegistryResult<Self> {
        let count = admins.len();
        let set: HashSet<Address> = admins.into_iter().collect();
        if set.len() != count {
            return Err(RegistryError::InvalidConfig(
                "admin list contains duplicates".to_string(),
            ));
        }
        if threshold == 0 || threshold > set.len() {
            return Err(RegistryError::InvalidConfig(format!(
                "threshold {threshold} must be between 1 and the admin count {}",
                set.len()
            )));
        }

        Ok(Self {
            admins: set,
            threshold,
            policy,
            nominations: HashMap::new(),
        })
    }

    #[must_use]
    pub fn is_admin(&self, address: &Address) -> bool {
        self.admins.contains(address)
    }

    pub fn ensure_admin(&self, caller: &Address) -> RegistryResult<()> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            Err(unauthorized_admin(caller))
        }
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }

    #[must_use]
    pub fn policy(&self) -> AdminPolicy {
        self.policy
    }

    /// Admins in ascending address order.
    #[must_use]
    pub fn admins(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self.admins.iter().copied().collect();
        out.sort();
        out
    }

    /// Nominations recorded for `candidate` under the quorum policy.
    #[must_use]
    pub fn nominations(&self, candidate: &Address) -> usize {
        self.nominations.get(candidate).map_or(0, BTreeSet::len)
    }

    /// Adds `candidate` to the admin set according to the configured policy.
    pub fn add_admin(&mut self, caller: Address, candidate: Address) -> RegistryResult<AdminChange> {
        self.ensure_admin(&caller)?;
        if self.is_admin(&candidate) {
            return Err(RegistryError::AlreadyAdmin(format!("{candidate:?}")));
        }

        match self.policy {
            AdminPolicy::SingleAdmin => {
                self.admins.insert(candidate);
                info!("Admin {:?} added by {:?}", candidate, caller);
                Ok(AdminChange::Added)
            }
            AdminPolicy::Quorum => {
                if self
                    .nominations
                    .get(&candidate)
                    .is_some_and(|n| n.contains(&caller))
                {
                    return Err(RegistryError::DuplicateNomination {
                        candidate: format!("{candidate:?}"),
                        admin: format!("{caller:?}"),
                    });
                }

                let nominated = self.nominations.entry(candidate).or_default();
                nominated.insert(caller);
                let count = nominated.len();
                if count >= self.threshold {
                    self.nominations.remove(&candidate);
                    self.admins.insert(candidate);
                    info!(
                        "Admin {:?} added after {} nominations",
                        candidate, count
                    );
                    Ok(AdminChange::Added)
                } else {
                    info!(
                        "Admin candidate {:?} nominated by {:?} ({}/{})",
                        candidate, caller, count, self.threshold
                    );
                    Ok(AdminChange::Pending(count))
                }
            }
        }
    }
}

/// Per-batch approval state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalRecord {
    pub batch_id: u64,
    pub approvers: BTreeSet<Address>,
    pub executed: bool,
    pub rejected: bool,
    pub created_at: u64,
    pub deadline: u64,
}

impl ApprovalRecord {
    /// Always the size of the approver set.
    #[must_use]
    pub fn approval_count(&self) -> usize {
        self.approvers.len()
    }
}

/// Snapshot returned by approval reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApprovalStatus {
    pub approvals: usize,
    pub executed: bool,
    pub created_at: u64,
}

impl From<&ApprovalRecord> for ApprovalStatus {
    fn from(record: &ApprovalRecord) -> Self {
        Self {
            approvals: record.approval_count(),
            executed: record.executed,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdGovernance {
    admins: AdminSet,
    approval_timeout: u64,
    records: HashMap<u64, ApprovalRecord>,
}

impl ThresholdGovernance {
    #[must_use]
    pub fn new(admins: AdminSet, approval_timeout_secs: u64) -> Self {
        Self {
            admins,
            approval_timeout: approval_timeout_secs,
            records: HashMap::new(),
        }
    }

    #[must_use]
    pub fn admins(&self) -> &AdminSet {
        &self.admins
    }

    #[must_use]
    pub fn is_admin(&self, address: &Address) -> bool {
        self.admins.is_admin(address)
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.admins.threshold()
    }

    #[must_use]
    pub fn approval_timeout(&self) -> u64 {
        self.approval_timeout
    }

    pub fn add_admin(&mut self, caller: Address, candidate: Address) -> RegistryResult<AdminChange> {
        self.admins.add_admin(caller, candidate)
    }

    /// Creates the approval record for a newly submitted batch.
    pub fn open_record(&mut self, batch_id: u64, now: u64) {
        let deadline = now.saturating_add(self.approval_timeout);
        self.records.insert(
            batch_id,
            ApprovalRecord {
                batch_id,
                approvers: BTreeSet::new(),
                executed: false,
                rejected: false,
                created_at: now,
                deadline,
            },
        );
        debug!("Approval record opened for batch {batch_id}, deadline {deadline}");
    }

    /// Records `caller`'s approval.
    ///
    /// Returns the new status and whether this call executed the record.
    pub fn approve_batch(
        &mut self,
        caller: Address,
        batch_id: u64,
        now: u64,
    ) -> RegistryResult<(ApprovalStatus, bool)> {
        self.admins.ensure_admin(&caller)?;
        let threshold = self.admins.threshold();
        let record = self
            .records
            .get_mut(&batch_id)
            .ok_or_else(|| RegistryError::batch_not_found(batch_id))?;

        if record.approvers.contains(&caller) {
            return Err(RegistryError::DuplicateApproval {
                batch_id,
                admin: format!("{caller:?}"),
            });
        }
        if record.executed {
            return Err(RegistryError::AlreadyExecuted(batch_id));
        }
        if record.rejected {
            return Err(RegistryError::AlreadyRejected(batch_id));
        }
        if now > record.deadline {
            return Err(RegistryError::ApprovalExpired(batch_id));
        }

        record.approvers.insert(caller);
        let count = record.approval_count();
        let newly_executed = count >= threshold;
        if newly_executed {
            record.executed = true;
            info!("Batch {batch_id} reached {count}/{threshold} approvals and is executed");
        } else {
            info!("Batch {batch_id} approved by {caller:?} ({count}/{threshold})");
        }
        Ok((ApprovalStatus::from(&*record), newly_executed))
    }

    /// Marks an unexecuted record whose deadline has passed as rejected.
    pub fn reject_batch(&mut self, caller: Address, batch_id: u64, now: u64) -> RegistryResult<()> {
        self.admins.ensure_admin(&caller)?;
        let record = self
            .records
            .get_mut(&batch_id)
            .ok_or_else(|| RegistryError::batch_not_found(batch_id))?;

        if record.executed {
            return Err(RegistryError::AlreadyExecuted(batch_id));
        }
        if record.rejected {
            return Err(RegistryError::AlreadyRejected(batch_id));
        }
        if now <= record.deadline {
            return Err(RegistryError::ApprovalWindowOpen(batch_id));
        }

        record.rejected = true;
        info!(
            "Batch {batch_id} rejected by {caller:?} with {} approvals",
            record.approval_count()
        );
        Ok(())
    }

    /// Marks a record executed after the batch was accepted by other means.
    pub(crate) fn mark_executed(&mut self, batch_id: u64) {
        if let Some(record) = self.records.get_mut(&batch_id) {
            record.executed = true;
        }
    }

    #[must_use]
    pub fn get_batch_approval_status(&self, batch_id: u64) -> Option<ApprovalStatus> {
        self.records.get(&batch_id).map(ApprovalStatus::from)
    }

    #[must_use]
    pub fn record(&self, batch_id: u64) -> Option<&ApprovalRecord> {
        self.records.get(&batch_id)
    }

    #[must_use]
    pub fn has_approved(&self, admin: &Address, batch_id: u64) -> bool {
        self.records
            .get(&batch_id)
            .is_some_and(|r| r.approvers.contains(admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = 24 * 60 * 60;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn governance(policy: AdminPolicy) -> ThresholdGovernance {
        let admins = AdminSet::new(vec![addr(1), addr(2), addr(3)], 2, policy).unwrap();
        ThresholdGovernance::new(admins, 7 * DAY)
    }

    #[test]
    fn test_admin_set_rejects_bad_threshold() {
        assert!(AdminSet::new(vec![addr(1)], 0, AdminPolicy::SingleAdmin).is_err());
        assert!(AdminSet::new(vec![addr(1)], 2, AdminPolicy::SingleAdmin).is_err());
        assert!(AdminSet::new(vec![addr(1), addr(1)], 1, AdminPolicy::SingleAdmin).is_err());
        assert!(AdminSet::new(vec![addr(1), addr(2)], 2, AdminPolicy::Quorum).is_ok());
    }

    #[test]
    fn test_threshold_executes_exactly_once() {
        let mut gov = governance(AdminPolicy::SingleAdmin);
        gov.open_record(0, 100);

        let (status, executed) = gov.approve_batch(addr(1), 0, 101).unwrap();
        assert_eq!(status.approvals, 1);
        assert!(!status.executed);
        assert!(!executed);

        let (status, executed) = gov.approve_batch(addr(2), 0, 102).unwrap();
        assert_eq!(status.approvals, 2);
        assert!(status.executed);
        assert!(executed);

        let err = gov.approve_batch(addr(2), 0, 103).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateApproval { batch_id: 0, .. }));
        assert_eq!(
            gov.approve_batch(addr(3), 0, 103).unwrap_err(),
            RegistryError::AlreadyExecuted(0)
        );
        assert_eq!(gov.get_batch_approval_status(0).unwrap().approvals, 2);
        assert!(gov.has_approved(&addr(2), 0));
        assert!(!gov.has_approved(&addr(3), 0));
    }

    #[test]
    fn test_non_admin_and_unknown_batch() {
        let mut gov = governance(AdminPolicy::SingleAdmin);
        gov.open_record(0, 0);
        assert!(matches!(
            gov.approve_batch(addr(9), 0, 1),
            Err(RegistryError::Unauthorized(_))
        ));
        assert!(matches!(
            gov.approve_batch(addr(1), 5, 1),
            Err(RegistryError::NotFound { .. })
        ));
        assert_eq!(gov.get_batch_approval_status(0).unwrap().approvals, 0);
    }

    #[test]
    fn test_deadline_gates_approval_and_rejection() {
        let mut gov = governance(AdminPolicy::SingleAdmin);
        gov.open_record(0, 0);
        gov.approve_batch(addr(1), 0, 10).unwrap();

        assert_eq!(
            gov.reject_batch(addr(2), 0, 7 * DAY).unwrap_err(),
            RegistryError::ApprovalWindowOpen(0)
        );
        assert_eq!(
            gov.approve_batch(addr(2), 0, 7 * DAY + 1).unwrap_err(),
            RegistryError::ApprovalExpired(0)
        );

        gov.reject_batch(addr(2), 0, 7 * DAY + 1).unwrap();
        assert_eq!(
            gov.reject_batch(addr(3), 0, 7 * DAY + 2).unwrap_err(),
            RegistryError::AlreadyRejected(0)
        );
        assert!(gov.record(0).unwrap().rejected);
    }

    #[test]
    fn test_single_admin_policy_adds_directly() {
        let mut gov = governance(AdminPolicy::SingleAdmin);
        assert_eq!(gov.add_admin(addr(1), addr(4)).unwrap(), AdminChange::Added);
        assert!(gov.is_admin(&addr(4)));
        assert!(matches!(
            gov.add_admin(addr(2), addr(4)),
            Err(RegistryError::AlreadyAdmin(_))
        ));
        assert!(matches!(
            gov.add_admin(addr(9), addr(5)),
            Err(RegistryError::Unauthorized(_))
        ));
        assert_eq!(gov.admins().admin_count(), 4);
    }

    #[test]
    fn test_quorum_policy_waits_for_threshold_nominations() {
        let mut gov = governance(AdminPolicy::Quorum);
        assert_eq!(gov.add_admin(addr(1), addr(4)).unwrap(), AdminChange::Pending(1));
        assert!(!gov.is_admin(&addr(4)));
        assert!(matches!(
            gov.add_admin(addr(1), addr(4)),
            Err(RegistryError::DuplicateNomination { .. })
        ));
        assert_eq!(gov.admins().nominations(&addr(4)), 1);

        assert_eq!(gov.add_admin(addr(3), addr(4)).unwrap(), AdminChange::Added);
        assert!(gov.is_admin(&addr(4)));
        assert_eq!(gov.admins().nominations(&addr(4)), 0);
    }

    #[test]
    fn test_policy_parses_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: AdminPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"quorum\"").unwrap();
        assert_eq!(w.policy, AdminPolicy::Quorum);
    }
}

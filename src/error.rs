//! Failure taxonomy shared by every state-mutating component.
//!
//! Every operation that touches registry, governance, contributor or
//! membership state either commits fully or returns one of these variants
//! without having changed anything.

use thiserror::Error;

/// Result alias used across the core components.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The caller lacks the role the operation requires.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The Groth16 pairing check rejected the proof, or a proof point is not
    /// a valid curve point.
    #[error("invalid membership proof")]
    InvalidProof,

    /// The proof's membership root is not in the current validity window.
    #[error("membership root {0} is not in the valid root window")]
    StaleRoot(String),

    /// A proof element or public signal is not a canonical field element.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("admin {admin} already approved batch {batch_id}")]
    DuplicateApproval { batch_id: u64, admin: String },

    /// The attached stake does not equal any recognized tier value.
    #[error("stake of {0} wei does not match a recognized tier")]
    InvalidTier(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("batch {0} approval has already been executed")]
    AlreadyExecuted(u64),

    #[error("batch {0} has already been rejected")]
    AlreadyRejected(u64),

    #[error("approval window for batch {0} has expired")]
    ApprovalExpired(u64),

    #[error("approval window for batch {0} is still open")]
    ApprovalWindowOpen(u64),

    #[error("commitment {0} has already backed a batch")]
    CommitmentAlreadyUsed(String),

    #[error("contributor {0} is already registered")]
    AlreadyRegistered(String),

    #[error("{0} is already an admin")]
    AlreadyAdmin(String),

    #[error("admin {admin} already nominated {candidate}")]
    DuplicateNomination { candidate: String, admin: String },

    #[error("contributor {reviewer} already reviewed batch {batch_id}")]
    AlreadyReviewed { batch_id: u64, reviewer: String },

    #[error("member {member} already voted on proposal {proposal_id}")]
    DuplicateVote { proposal_id: u64, member: String },

    #[error("voting on proposal {0} has closed")]
    VotingClosed(u64),

    #[error("voting on proposal {0} is still open")]
    VotingOpen(u64),

    #[error("proposal {0} has already been finalized")]
    AlreadyFinalized(u64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RegistryError {
    pub(crate) fn batch_not_found(batch_id: u64) -> Self {
        RegistryError::NotFound {
            kind: "batch",
            id: batch_id.to_string(),
        }
    }

    /// Short stable name of the failure kind, used in log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::Unauthorized(_) => "Unauthorized",
            RegistryError::InvalidProof => "InvalidProof",
            RegistryError::StaleRoot(_) => "StaleRoot",
            RegistryError::MalformedInput(_) => "MalformedInput",
            RegistryError::DuplicateApproval { .. } => "DuplicateApproval",
            RegistryError::InvalidTier(_) => "InvalidTier",
            RegistryError::NotFound { .. } => "NotFound",
            RegistryError::AlreadyExecuted(_) => "AlreadyExecuted",
            RegistryError::AlreadyRejected(_) => "AlreadyRejected",
            RegistryError::ApprovalExpired(_) => "ApprovalExpired",
            RegistryError::ApprovalWindowOpen(_) => "ApprovalWindowOpen",
            RegistryError::CommitmentAlreadyUsed(_) => "CommitmentAlreadyUsed",
            RegistryError::AlreadyRegistered(_) => "AlreadyRegistered",
            RegistryError::AlreadyAdmin(_) => "AlreadyAdmin",
            RegistryError::DuplicateNomination { .. } => "DuplicateNomination",
            RegistryError::AlreadyReviewed { .. } => "AlreadyReviewed",
            RegistryError::DuplicateVote { .. } => "DuplicateVote",
            RegistryError::VotingClosed(_) => "VotingClosed",
            RegistryError::VotingOpen(_) => "VotingOpen",
            RegistryError::AlreadyFinalized(_) => "AlreadyFinalized",
            RegistryError::InvalidConfig(_) => "InvalidConfig",
        }
    }
}

//! Threat-intelligence batch registry with threshold governance and
//! anonymous contributor membership proofs.
//!
//! Contributors publish batches of indicators of compromise (IOCs) as a
//! content identifier plus an integrity Merkle root. A batch is accepted only
//! once K of N admins approve it. Contributors may also submit anonymously by
//! proving, in zero knowledge, that their address is a leaf of the current
//! Poseidon contributor tree.
//!
//! # Components
//!
//! - [`CtiPlatform`]: the operation surface tying every component together
//! - [`BatchRegistry`]: append-only batch storage with persisted counters
//! - [`ThresholdGovernance`]: K-of-N batch approval over an [`AdminSet`]
//! - [`VotingGovernance`]: proposal/vote/finalize acceptance sharing the admin set
//! - [`ContributorRegistry`]: tiered stakes and outcome-driven reputation
//! - [`MerkleCommitmentTree`]: Keccak sorted-pair integrity tree over IOCs
//! - [`ContributorTree`]: Poseidon contributor tree built off-chain
//! - [`ContributorMembershipTree`]: the bounded window of valid contributor roots
//! - [`ZkMembershipVerifier`]: range, window and Groth16 checks on membership proofs
//! - [`MembershipProver`]: Groth16 setup and proving for the membership circuit
//!
//! # Example
//!
//! ```no_run
//! use cti_zk_registry::{merkle::MerkleCommitmentTree, DEFAULT_TREE_DEPTH};
//!
//! let tree = MerkleCommitmentTree::from_items(&["198.51.100.7", "evil.example.com"]).unwrap();
//! println!("integrity root 0x{}, contributor depth {}", hex::encode(tree.root), DEFAULT_TREE_DEPTH);
//! ```

pub mod circuit;
pub mod clock;
pub mod config;
pub mod content_store;
pub mod contributor;
pub mod contributor_tree;
pub mod error;
pub mod ethereum;
pub mod governance;
pub mod membership;
pub mod merkle;
pub mod platform;
pub mod poseidon;
pub mod registry;
pub mod types;
pub mod utils;
pub mod verifier;
pub mod voting;


pub use circuit::{MembershipCircuit, MembershipProver};
pub use clock::{Clock, ManualClock, SystemClock};
pub use contributor::{AccessLevel, ContributorRegistry, StakeTier};
pub use contributor_tree::{ContributorTree, MembershipPath, TreeRebuilder};
pub use error::{RegistryError, RegistryResult};
pub use governance::{AdminPolicy, AdminSet, ThresholdGovernance};
pub use membership::ContributorMembershipTree;
pub use merkle::{MerkleCommitmentTree, MerkleProof};
pub use platform::CtiPlatform;
pub use registry::BatchRegistry;
pub use types::{Batch, Commitment, MembershipProofFile, PlatformStats, ProofElements, PublicSignals};
pub use verifier::{ArkGroth16Verifier, Groth16Verifier, ZkMembershipVerifier};
pub use voting::VotingGovernance;

/// Depth of the contributor membership tree.
///
/// The tree holds up to 2^depth contributors; unused leaves are zero. The
/// circuit is specific to one depth, so the Groth16 keys are generated and
/// cached per depth.
///
/// # Security Considerations
///
/// Changing the depth requires regenerating the proving and verifying keys.
/// Prover and verifier must agree on it, or every proof fails the pairing
/// check.
///
/// # Performance Trade-offs
///
/// Each level adds one Poseidon permutation to the circuit, so proving time
/// grows linearly with depth while capacity doubles.
pub const DEFAULT_TREE_DEPTH: usize = config::DEFAULT_TREE_DEPTH;

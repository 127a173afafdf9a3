//! Type definitions shared by the registry, governance and proof components.

use crate::contributor::StakeTier;
use crate::utils::{parse_word, word_to_decimal};
use anyhow::{Context, Result};
use ethers::types::Address;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HASH_SIZE: usize = 32;

/// Number of field elements in a Groth16 proof on the wire.
pub const PROOF_ELEMENTS: usize = 8;

/// A 256-bit big-endian word: an integrity root, a membership root, a
/// commitment or a single proof coordinate.
pub type FieldBytes = [u8; HASH_SIZE];

/// Opaque commitment standing in for an anonymous contributor.
///
/// Nothing in this crate maps a commitment back to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commitment(pub FieldBytes);

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Who submitted a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Submitter {
    Public(Address),
    Anonymous {
        commitment: Commitment,
        tier: StakeTier,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Anonymous,
}

impl Submitter {
    #[must_use]
    pub fn visibility(&self) -> Visibility {
        match self {
            Submitter::Public(_) => Visibility::Public,
            Submitter::Anonymous { .. } => Visibility::Anonymous,
        }
    }
}

/// A submitted IOC batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub index: u64,
    pub cid: String,
    pub integrity_root: FieldBytes,
    pub timestamp: u64,
    pub accepted: bool,
    pub submitter: Submitter,
    pub confirmations: u64,
    pub disputes: u64,
}

impl Batch {
    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.submitter.visibility()
    }
}

/// Aggregate counters, maintained on every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub total_batches: u64,
    pub accepted_batches: u64,
    pub public_batches: u64,
    pub anonymous_batches: u64,
    pub public_contributors: u64,
    pub anonymous_contributors: u64,
    /// Sum of all stakes, in wei, as a decimal string.
    pub total_staked: String,
}

/// Public inputs of the membership circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSignals {
    pub root: FieldBytes,
    pub commitment: Commitment,
}

impl PublicSignals {
    /// Public inputs in the order the circuit allocates them.
    #[must_use]
    pub fn circuit_order(&self) -> [FieldBytes; 2] {
        [self.commitment.0, self.root]
    }
}

/// A Groth16 proof as eight 256-bit words, in Solidity verifier order:
/// `a.x, a.y, b.x.c1, b.x.c0, b.y.c1, b.y.c0, c.x, c.y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofElements(pub [FieldBytes; PROOF_ELEMENTS]);

/// JSON document written by the prover binary and read by the verifier.
///
/// All numbers are decimal strings, matching snarkjs output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipProofFile {
    /// The eight proof words in Solidity verifier order.
    pub proof: Vec<String>,
    /// Commitment `poseidon(address, nonce)`.
    pub commitment: String,
    /// Contributor tree root the proof was generated against.
    pub merkle_root: String,
    /// Depth of the contributor tree the keys were generated for.
    pub tree_depth: usize,
    /// Unix timestamp when proof was generated
    pub timestamp: u64,
}

impl MembershipProofFile {
    const TIMESTAMP_TOLERANCE_SECS: u64 = 30;

    #[must_use]
    pub fn from_parts(
        proof: &ProofElements,
        signals: &PublicSignals,
        tree_depth: usize,
        timestamp: u64,
    ) -> Self {
        Self {
            proof: proof.0.iter().map(word_to_decimal).collect(),
            commitment: word_to_decimal(&signals.commitment.0),
            merkle_root: word_to_decimal(&signals.root),
            tree_depth,
            timestamp,
        }
    }

    /// Parses and checks the document's shape and freshness.
    ///
    /// Range checks against the field moduli are left to the verifier so
    /// that an out-of-range word surfaces as `MalformedInput` there.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The proof does not have exactly eight words
    /// - Any word is not decimal or 0x-hex, or exceeds 256 bits
    /// - The timestamp is in the future or older than `max_age_secs`
    pub fn parse(&self, max_age_secs: u64) -> Result<(ProofElements, PublicSignals)> {
        debug!("Starting proof file validation");
        debug!("Proof words: {}", self.proof.len());
        debug!("Tree depth: {}", self.tree_depth);
        debug!("Timestamp: {}", self.timestamp);

        if self.proof.len() != PROOF_ELEMENTS {
            return Err(anyhow::anyhow!(
                "Proof must contain exactly {} elements, got {}. Expected a8 = [a.x, a.y, b.x1, b.x0, b.y1, b.y0, c.x, c.y].",
                PROOF_ELEMENTS,
                self.proof.len()
            ));
        }

        let current_timestamp = unix_now()?;

        if self.timestamp > current_timestamp + Self::TIMESTAMP_TOLERANCE_SECS {
            return Err(anyhow::anyhow!(
                "Timestamp is too far in the future: {} (current: {}, tolerance: {}s). Please check system clock and proof timestamp.",
                self.timestamp,
                current_timestamp,
                Self::TIMESTAMP_TOLERANCE_SECS
            ));
        }

        if current_timestamp > self.timestamp + max_age_secs {
            return Err(anyhow::anyhow!(
                "Timestamp is too old: {} (current: {}, max age: {}s). Please generate a fresh proof.",
                self.timestamp,
                current_timestamp,
                max_age_secs
            ));
        }

        let mut words = [[0u8; HASH_SIZE]; PROOF_ELEMENTS];
        for (i, (slot, text)) in words.iter_mut().zip(&self.proof).enumerate() {
            *slot = parse_word(text).with_context(|| format!("Invalid proof element {i}"))?;
        }

        let commitment = parse_word(&self.commitment).context("Invalid commitment")?;
        let root = parse_word(&self.merkle_root).context("Invalid merkle root")?;

        Ok((
            ProofElements(words),
            PublicSignals {
                root,
                commitment: Commitment(commitment),
            },
        ))
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> Result<u64> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| anyhow::anyhow!("System clock unavailable: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file(timestamp: u64) -> MembershipProofFile {
        let proof = ProofElements([[1u8; HASH_SIZE]; PROOF_ELEMENTS]);
        let signals = PublicSignals {
            root: [2u8; HASH_SIZE],
            commitment: Commitment([3u8; HASH_SIZE]),
        };
        MembershipProofFile::from_parts(&proof, &signals, 20, timestamp)
    }

    #[test]
    fn test_proof_file_parses_back() {
        let now = unix_now().unwrap();
        let file = sample_file(now);
        let (proof, signals) = file.parse(3600).unwrap();
        assert_eq!(proof.0[7], [1u8; HASH_SIZE]);
        assert_eq!(signals.root, [2u8; HASH_SIZE]);
        assert_eq!(signals.commitment, Commitment([3u8; HASH_SIZE]));
    }

    #[test]
    fn test_proof_file_wrong_element_count() {
        let mut file = sample_file(unix_now().unwrap());
        file.proof.pop();
        let err = file.parse(3600).unwrap_err();
        assert!(err.to_string().contains("exactly 8 elements"));
    }

    #[test]
    fn test_proof_file_too_old() {
        let file = sample_file(unix_now().unwrap() - 7200);
        assert!(file.parse(3600).is_err());
    }

    #[test]
    fn test_public_signals_circuit_order() {
        let signals = PublicSignals {
            root: [9u8; HASH_SIZE],
            commitment: Commitment([4u8; HASH_SIZE]),
        };
        assert_eq!(signals.circuit_order(), [[4u8; HASH_SIZE], [9u8; HASH_SIZE]]);
    }

    #[test]
    fn test_submitter_visibility() {
        let public = Submitter::Public(Address::repeat_byte(0x11));
        let anonymous = Submitter::Anonymous {
            commitment: Commitment([5u8; HASH_SIZE]),
            tier: StakeTier::Standard,
        };
        assert_eq!(public.visibility(), Visibility::Public);
        assert_eq!(anonymous.visibility(), Visibility::Anonymous);
    }
}

//! Integrity Merkle tree over IOC batches.
//!
//! Leaves are Keccak-256 hashes of the IOC strings. Internal nodes hash the
//! two children in ascending byte order, and the leaf set itself is sorted and
//! de-duplicated before building, so the root depends only on the set of IOCs
//! and not on the order they were listed in. An unpaired node is promoted to
//! the next level unchanged.
//!
//! Leaves and internal nodes share one hash domain, so a path check proves
//! only that a word lies on some path to the root. Callers that need an IOC
//! proof hash the raw IOC with [`hash_leaf`] themselves.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// An inclusion proof for one IOC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: [u8; 32],
    pub root: [u8; 32],
    pub siblings: Vec<[u8; 32]>,
    /// Position of the leaf in the sorted leaf set.
    pub index: usize,
    /// One bit per sibling: `true` when the node on the path is the right
    /// child at that level.
    pub path_bits: Vec<bool>,
}

/// Merkle tree over a sorted, de-duplicated leaf set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleCommitmentTree {
    pub root: [u8; 32],
    pub leaves: Vec<[u8; 32]>,
}

/// Keccak-256 of the raw IOC bytes.
#[must_use]
pub fn hash_leaf(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

fn hash_sorted_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Keccak256::new();
    hasher.update(lo);
    hasher.update(hi);
    hasher.finalize().into()
}

fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_sorted_pair(left, right),
            [single] => *single,
            _ => unreachable!("chunks(2) yields one or two nodes"),
        })
        .collect()
}

/// Recomputes the root from a leaf and its sibling path.
///
/// Because pairs are combined in sorted order the direction bits are not
/// needed to verify, which lets any holder of the dataset check an IOC
/// against a stored root with just the siblings.
#[must_use]
pub fn verify_sorted_pair_path(root: &[u8; 32], leaf: &[u8; 32], siblings: &[[u8; 32]]) -> bool {
    let computed = siblings
        .iter()
        .fold(*leaf, |acc, sibling| hash_sorted_pair(&acc, sibling));
    &computed == root
}

impl MerkleCommitmentTree {
    /// Build a tree from leaf hashes.
    ///
    /// # Errors
    /// Returns an error if `leaves` is empty.
    pub fn new(mut leaves: Vec<[u8; 32]>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(anyhow::anyhow!(
                "Cannot build an integrity tree over an empty IOC set"
            ));
        }

        leaves.sort_unstable();
        leaves.dedup();

        let mut level = leaves.clone();
        while level.len() > 1 {
            level = next_level(&level);
        }

        Ok(MerkleCommitmentTree {
            root: level[0],
            leaves,
        })
    }

    /// Build a tree from raw IOC strings.
    pub fn from_items<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        Self::new(
            items
                .iter()
                .map(|item| hash_leaf(item.as_ref().as_bytes()))
                .collect(),
        )
    }

    /// Generate a proof for the leaf at `leaf_index` in the sorted leaf set.
    ///
    /// Returns `None` if the index is out of range.
    pub fn generate_proof(&self, leaf_index: usize) -> Option<MerkleProof> {
        if leaf_index >= self.leaves.len() {
            return None;
        }

        let mut siblings = Vec::new();
        let mut path_bits = Vec::new();
        let mut level = self.leaves.clone();
        let mut index = leaf_index;

        while level.len() > 1 {
            let is_right = index % 2 == 1;
            let sibling_index = if is_right { index - 1 } else { index + 1 };

            // a promoted node has no sibling at this level
            if sibling_index < level.len() {
                siblings.push(level[sibling_index]);
                path_bits.push(is_right);
            }

            level = next_level(&level);
            index /= 2;
        }

        Some(MerkleProof {
            leaf: self.leaves[leaf_index],
            root: self.root,
            siblings,
            index: leaf_index,
            path_bits,
        })
    }

    /// Generate a proof for a raw IOC string, if it is part of the set.
    pub fn proof_for_item(&self, item: &str) -> Option<MerkleProof> {
        let leaf = hash_leaf(item.as_bytes());
        let index = self.leaves.binary_search(&leaf).ok()?;
        self.generate_proof(index)
    }

    /// Verify a proof against this tree's root.
    pub fn verify_proof(&self, proof: &MerkleProof) -> bool {
        if proof.root != self.root {
            return false;
        }
        verify_sorted_pair_path(&self.root, &proof.leaf, &proof.siblings)
    }
}

impl fmt::Display for MerkleProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MerkleProof:\n  Leaf: {}\n  Root: {}\n  Index: {}\n  Siblings: {}",
            hex::encode(self.leaf),
            hex::encode(self.root),
            self.index,
            self.siblings.len()
        )
    }
}

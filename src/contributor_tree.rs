//! Off-chain builder for the Poseidon contributor tree.
//!
//! The tree has a fixed depth. Leaves are contributor addresses as field
//! elements, padded with zero leaves up to `2^depth`. Only the populated
//! prefix of each level is stored; an absent node equals the root of an
//! all-zero subtree of that height, precomputed once per tree.

use crate::error::{RegistryError, RegistryResult};
use crate::ethereum::address_to_field;
use crate::poseidon::poseidon_hash;
use ark_bn254::Fr;
use ark_std::Zero;
use ethers::types::Address;
use log::{debug, info};

/// Largest supported depth.
pub const MAX_TREE_DEPTH: usize = 32;

/// Sibling path for one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipPath {
    pub leaf: Fr,
    pub siblings: Vec<Fr>,
    /// `true` when the node on the path is the right child at that level.
    pub path_bits: Vec<bool>,
}

impl MembershipPath {
    /// Folds the path back up to a root.
    pub fn compute_root(&self) -> RegistryResult<Fr> {
        let mut current = self.leaf;
        for (sibling, is_right) in self.siblings.iter().zip(&self.path_bits) {
            current = if *is_right {
                poseidon_hash(*sibling, current)?
            } else {
                poseidon_hash(current, *sibling)?
            };
        }
        Ok(current)
    }
}

#[derive(Debug, Clone)]
pub struct ContributorTree {
    depth: usize,
    /// `levels[0]` holds the leaves, `levels[depth]` holds the root.
    levels: Vec<Vec<Fr>>,
    /// `zeros[h]` is the root of an all-zero subtree of height `h`.
    zeros: Vec<Fr>,
}

impl ContributorTree {
    /// Builds a tree of the given depth over `leaves`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when the depth is zero or
    /// above [`MAX_TREE_DEPTH`], or when there are more leaves than fit.
    pub fn new(depth: usize, leaves: Vec<Fr>) -> RegistryResult<Self> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(RegistryError::InvalidConfig(format!(
                "contributor tree depth must be between 1 and {MAX_TREE_DEPTH}, got {depth}"
            )));
        }
        if (leaves.len() as u64) > (1u64 << depth) {
            return Err(RegistryError::InvalidConfig(format!(
                "{} contributors do not fit a tree of depth {depth}",
                leaves.len()
            )));
        }

        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(Fr::zero());
        for h in 0..depth {
            zeros.push(poseidon_hash(zeros[h], zeros[h])?);
        }

        let mut levels = Vec::with_capacity(depth + 1);
        levels.push(leaves);
        for h in 0..depth {
            let below = &levels[h];
            let mut above = Vec::with_capacity(below.len().div_ceil(2));
            for pair in below.chunks(2) {
                let right = pair.get(1).copied().unwrap_or(zeros[h]);
                above.push(poseidon_hash(pair[0], right)?);
            }
            levels.push(above);
        }

        let tree = ContributorTree {
            depth,
            levels,
            zeros,
        };
        debug!(
            "Built contributor tree: depth={}, leaves={}",
            depth,
            tree.len()
        );
        Ok(tree)
    }

    /// Builds a tree whose leaves are the given contributor addresses, in order.
    ///
    /// The zero address is refused: its leaf is indistinguishable from padding.
    pub fn from_addresses(depth: usize, addresses: &[Address]) -> RegistryResult<Self> {
        if addresses.iter().any(Address::is_zero) {
            return Err(RegistryError::MalformedInput(
                "the zero address cannot be a contributor leaf".to_string(),
            ));
        }
        Self::new(depth, addresses.iter().map(address_to_field).collect())
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of populated leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    #[must_use]
    pub fn root(&self) -> Fr {
        self.levels[self.depth]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.depth])
    }

    #[must_use]
    pub fn index_of(&self, leaf: &Fr) -> Option<usize> {
        self.levels[0].iter().position(|l| l == leaf)
    }

    fn node(&self, height: usize, index: usize) -> Fr {
        self.levels[height]
            .get(index)
            .copied()
            .unwrap_or(self.zeros[height])
    }

    /// Sibling path for the populated leaf at `index`.
    pub fn path(&self, index: usize) -> Option<MembershipPath> {
        if index >= self.len() {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_bits = Vec::with_capacity(self.depth);
        let mut position = index;
        for height in 0..self.depth {
            let is_right = position % 2 == 1;
            siblings.push(self.node(height, position ^ 1));
            path_bits.push(is_right);
            position /= 2;
        }

        Some(MembershipPath {
            leaf: self.levels[0][index],
            siblings,
            path_bits,
        })
    }

    /// Sibling path for a contributor address.
    pub fn path_for_address(&self, address: &Address) -> Option<MembershipPath> {
        self.index_of(&address_to_field(address))
            .and_then(|index| self.path(index))
    }
}

/// Periodic off-chain job state: rebuilds the tree from the current
/// contributor set and reports a root only when it differs from the one
/// last published.
#[derive(Debug, Clone)]
pub struct TreeRebuilder {
    depth: usize,
    interval_secs: u64,
    last_root: Option<Fr>,
    last_run: Option<u64>,
}

impl TreeRebuilder {
    #[must_use]
    pub fn new(depth: usize, interval_secs: u64) -> Self {
        Self {
            depth,
            interval_secs,
            last_root: None,
            last_run: None,
        }
    }

    /// Whether the rebuild interval has elapsed since the last run.
    #[must_use]
    pub fn is_due(&self, now: u64) -> bool {
        match self.last_run {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.interval_secs,
        }
    }

    /// Rebuilds the tree and returns the new root if it changed.
    pub fn rebuild(&mut self, contributors: &[Address], now: u64) -> RegistryResult<Option<Fr>> {
        let tree = ContributorTree::from_addresses(self.depth, contributors)?;
        let root = tree.root();
        self.last_run = Some(now);

        if self.last_root == Some(root) {
            debug!("Contributor tree unchanged ({} leaves)", tree.len());
            return Ok(None);
        }

        info!(
            "Contributor tree root changed: {} contributors, depth {}",
            tree.len(),
            self.depth
        );
        self.last_root = Some(root);
        Ok(Some(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(n: u8) -> Vec<Address> {
        (1..=n).map(Address::repeat_byte).collect()
    }

    #[test]
    fn test_every_path_folds_to_root() {
        let tree = ContributorTree::from_addresses(4, &addresses(5)).unwrap();
        for index in 0..tree.len() {
            let path = tree.path(index).unwrap();
            assert_eq!(path.siblings.len(), 4);
            assert_eq!(path.compute_root().unwrap(), tree.root(), "index {index}");
        }
    }

    #[test]
    fn test_padding_matches_explicit_zero_leaves() {
        let sparse = ContributorTree::from_addresses(3, &addresses(3)).unwrap();

        let mut dense_leaves: Vec<Fr> = addresses(3).iter().map(address_to_field).collect();
        dense_leaves.resize(8, Fr::zero());
        let dense = ContributorTree::new(3, dense_leaves).unwrap();

        assert_eq!(sparse.root(), dense.root());
    }

    #[test]
    fn test_zero_address_is_refused() {
        let mut members = addresses(2);
        members.push(Address::zero());
        assert!(matches!(
            ContributorTree::from_addresses(3, &members),
            Err(RegistryError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_empty_tree_root_is_zero_subtree() {
        let empty = ContributorTree::new(2, Vec::new()).unwrap();
        let z1 = poseidon_hash(Fr::zero(), Fr::zero()).unwrap();
        let z2 = poseidon_hash(z1, z1).unwrap();
        assert_eq!(empty.root(), z2);
        assert!(empty.path(0).is_none());
    }

    #[test]
    fn test_path_bits_follow_index() {
        let tree = ContributorTree::from_addresses(3, &addresses(8)).unwrap();
        let path = tree.path(5).unwrap();
        assert_eq!(path.path_bits, vec![true, false, true]);
    }

    #[test]
    fn test_rejects_overfull_tree_and_bad_depth() {
        assert!(ContributorTree::from_addresses(2, &addresses(5)).is_err());
        assert!(ContributorTree::new(0, Vec::new()).is_err());
        assert!(ContributorTree::new(MAX_TREE_DEPTH + 1, Vec::new()).is_err());
    }

    #[test]
    fn test_path_for_unknown_address() {
        let tree = ContributorTree::from_addresses(3, &addresses(2)).unwrap();
        assert!(tree.path_for_address(&Address::repeat_byte(0x99)).is_none());
        assert!(tree.path_for_address(&Address::repeat_byte(2)).is_some());
    }

    #[test]
    fn test_rebuilder_reports_only_changes() {
        let mut rebuilder = TreeRebuilder::new(3, 60);
        assert!(rebuilder.is_due(0));

        let first = rebuilder.rebuild(&addresses(2), 0).unwrap();
        assert!(first.is_some());
        assert!(!rebuilder.is_due(30));
        assert!(rebuilder.is_due(60));

        assert_eq!(rebuilder.rebuild(&addresses(2), 60).unwrap(), None);
        let grown = rebuilder.rebuild(&addresses(3), 120).unwrap();
        assert!(grown.is_some());
        assert_ne!(grown, first);
    }
}

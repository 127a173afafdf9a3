//! Contributor membership roots and their bounded validity window.
//!
//! The contributor tree is rebuilt off-chain; this component only accepts the
//! resulting root. The last `W` roots stay valid so a proof generated against
//! a root that was superseded after the proof was made still verifies until
//! the rotation after that.

use crate::error::{RegistryError, RegistryResult};
use crate::types::FieldBytes;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Smallest window that tolerates one rotation between proving and submitting.
pub const MIN_ROOT_WINDOW: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEntry {
    pub root: FieldBytes,
    pub installed_at: u64,
}

/// Ordered history of recent membership roots, oldest first.
#[derive(Debug, Clone)]
pub struct ContributorMembershipTree {
    capacity: usize,
    window: VecDeque<RootEntry>,
}

impl ContributorMembershipTree {
    /// Creates an empty window holding at most `capacity` roots.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when `capacity` is below
    /// [`MIN_ROOT_WINDOW`].
    pub fn new(capacity: usize) -> RegistryResult<Self> {
        if capacity < MIN_ROOT_WINDOW {
            return Err(RegistryError::InvalidConfig(format!(
                "root window size must be at least {MIN_ROOT_WINDOW}, got {capacity}"
            )));
        }
        Ok(Self {
            capacity,
            window: VecDeque::with_capacity(capacity),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pushes a new root, evicting the oldest once the window is full.
    ///
    /// Re-installing the current root is a no-op. Authorization is checked by
    /// the caller, which owns the admin set.
    pub fn update_merkle_root(&mut self, root: FieldBytes, now: u64) -> Option<RootEntry> {
        if self.current_root() == Some(root) {
            debug!("Membership root 0x{} already current", hex::encode(root));
            return None;
        }

        self.window.push_back(RootEntry {
            root,
            installed_at: now,
        });
        let evicted = if self.window.len() > self.capacity {
            self.window.pop_front()
        } else {
            None
        };

        info!(
            "Membership root rotated to 0x{} ({} of {} window slots used)",
            hex::encode(root),
            self.window.len(),
            self.capacity
        );
        if let Some(old) = &evicted {
            info!("Evicted membership root 0x{}", hex::encode(old.root));
        }
        evicted
    }

    /// Whether `root` is one of the last `W` installed roots.
    #[must_use]
    pub fn is_root_valid(&self, root: &FieldBytes) -> bool {
        self.window.iter().any(|entry| &entry.root == root)
    }

    #[must_use]
    pub fn current_root(&self) -> Option<FieldBytes> {
        self.window.back().map(|entry| entry.root)
    }

    /// Valid roots, oldest first.
    #[must_use]
    pub fn valid_roots(&self) -> Vec<RootEntry> {
        self.window.iter().copied().collect()
    }
}

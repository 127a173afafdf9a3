//! Tiered-stake contributor registry.
//!
//! Public contributors register under their address; anonymous contributors
//! register a stake under an opaque commitment. Reputation moves only in
//! response to governance outcome events.

use crate::error::{RegistryError, RegistryResult};
use crate::governance::GovernanceEvent;
use crate::types::{Commitment, Submitter};
use ethers::types::{Address, U256};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Recognized stake levels. The attached value must match one exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StakeTier {
    /// 0.01 ETH
    Micro,
    /// 0.05 ETH
    Standard,
    /// 0.1 ETH
    Premium,
}

impl StakeTier {
    pub const ALL: [StakeTier; 3] = [StakeTier::Micro, StakeTier::Standard, StakeTier::Premium];

    /// Stake in wei.
    #[must_use]
    pub fn stake_wei(self) -> U256 {
        match self {
            StakeTier::Micro => U256::exp10(16),
            StakeTier::Standard => U256::exp10(16) * U256::from(5u64),
            StakeTier::Premium => U256::exp10(17),
        }
    }

    /// Reputation gained per accepted batch, and lost per rejected one.
    #[must_use]
    pub fn reputation_bonus(self) -> i64 {
        match self {
            StakeTier::Micro => 7,
            StakeTier::Standard => 10,
            StakeTier::Premium => 15,
        }
    }

    /// Maps an attached value to its tier.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidTier`] unless `value` equals a tier stake exactly.
    pub fn from_value(value: U256) -> RegistryResult<Self> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.stake_wei() == value)
            .ok_or_else(|| RegistryError::InvalidTier(value.to_string()))
    }
}

/// Access level derived from reputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessLevel {
    Basic,
    Standard,
    Gold,
    Platinum,
}

impl AccessLevel {
    #[must_use]
    pub fn for_reputation(reputation: i64) -> Self {
        match reputation {
            r if r >= 200 => AccessLevel::Platinum,
            r if r >= 150 => AccessLevel::Gold,
            r if r >= 100 => AccessLevel::Standard,
            _ => AccessLevel::Basic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub address: Address,
    pub submission_count: u64,
    pub accepted_count: u64,
    pub reputation: i64,
    pub tier: StakeTier,
    pub staked: U256,
    pub active: bool,
    pub registered_at: u64,
}

/// Stake registered under a commitment; carries no address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousContributor {
    pub commitment: Commitment,
    pub submission_count: u64,
    pub accepted_count: u64,
    pub reputation: i64,
    pub tier: StakeTier,
    pub staked: U256,
    pub registered_at: u64,
}

#[derive(Debug, Default)]
pub struct ContributorRegistry {
    public: HashMap<Address, Contributor>,
    anonymous: HashMap<Commitment, AnonymousContributor>,
    total_staked: U256,
}

impl ContributorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address` with the stake `value`.
    pub fn register(&mut self, address: Address, value: U256, now: u64) -> RegistryResult<StakeTier> {
        let tier = StakeTier::from_value(value)?;
        if self.public.contains_key(&address) {
            return Err(RegistryError::AlreadyRegistered(format!("{address:?}")));
        }

        self.public.insert(
            address,
            Contributor {
                address,
                submission_count: 0,
                accepted_count: 0,
                reputation: 0,
                tier,
                staked: value,
                active: true,
                registered_at: now,
            },
        );
        self.total_staked += value;
        info!("Registered contributor {:?} at tier {:?}", address, tier);
        Ok(tier)
    }

    /// Registers an anonymous stake under `commitment`.
    pub fn register_anonymous(
        &mut self,
        commitment: Commitment,
        value: U256,
        now: u64,
    ) -> RegistryResult<StakeTier> {
        let tier = StakeTier::from_value(value)?;
        if self.anonymous.contains_key(&commitment) {
            return Err(RegistryError::AlreadyRegistered(commitment.to_string()));
        }

        self.anonymous.insert(
            commitment,
            AnonymousContributor {
                commitment,
                submission_count: 0,
                accepted_count: 0,
                reputation: 0,
                tier,
                staked: value,
                registered_at: now,
            },
        );
        self.total_staked += value;
        info!("Registered anonymous contributor at tier {:?}", tier);
        Ok(tier)
    }

    #[must_use]
    pub fn is_active(&self, address: &Address) -> bool {
        self.public.get(address).is_some_and(|c| c.active)
    }

    /// Fails with `Unauthorized` unless `address` is an active contributor.
    pub fn ensure_active(&self, address: &Address) -> RegistryResult<()> {
        if self.is_active(address) {
            Ok(())
        } else {
            Err(RegistryError::Unauthorized(format!(
                "{address:?} is not an active contributor"
            )))
        }
    }

    #[must_use]
    pub fn get(&self, address: &Address) -> Option<&Contributor> {
        self.public.get(address)
    }

    #[must_use]
    pub fn get_anonymous(&self, commitment: &Commitment) -> Option<&AnonymousContributor> {
        self.anonymous.get(commitment)
    }

    #[must_use]
    pub fn access_level(&self, address: &Address) -> Option<AccessLevel> {
        self.public
            .get(address)
            .map(|c| AccessLevel::for_reputation(c.reputation))
    }

    /// Counts a new submission against its submitter.
    pub fn record_submission(&mut self, submitter: &Submitter) {
        match submitter {
            Submitter::Public(address) => {
                if let Some(c) = self.public.get_mut(address) {
                    c.submission_count += 1;
                }
            }
            Submitter::Anonymous { commitment, .. } => {
                if let Some(c) = self.anonymous.get_mut(commitment) {
                    c.submission_count += 1;
                }
            }
        }
    }

    /// Applies a governance outcome to the submitter's reputation.
    pub fn apply_outcome(&mut self, event: &GovernanceEvent) {
        let (submitter, accepted) = match event {
            GovernanceEvent::BatchAccepted { submitter, .. } => (submitter, true),
            GovernanceEvent::BatchRejected { submitter, .. } => (submitter, false),
        };

        let (reputation, accepted_count, tier) = match submitter {
            Submitter::Public(address) => match self.public.get_mut(address) {
                Some(c) => (&mut c.reputation, &mut c.accepted_count, c.tier),
                None => {
                    warn!("Outcome for unknown contributor {:?}", address);
                    return;
                }
            },
            Submitter::Anonymous { commitment, .. } => match self.anonymous.get_mut(commitment) {
                Some(c) => (&mut c.reputation, &mut c.accepted_count, c.tier),
                None => {
                    debug!("Outcome for unregistered commitment; no reputation to adjust");
                    return;
                }
            },
        };

        let bonus = tier.reputation_bonus();
        if accepted {
            *reputation += bonus;
            *accepted_count += 1;
        } else {
            *reputation -= bonus;
        }
        debug!("Reputation adjusted to {} after {:?}", reputation, event);
    }

    #[must_use]
    pub fn public_count(&self) -> u64 {
        self.public.len() as u64
    }

    #[must_use]
    pub fn anonymous_count(&self) -> u64 {
        self.anonymous.len() as u64
    }

    #[must_use]
    pub fn total_staked(&self) -> U256 {
        self.total_staked
    }

    /// Addresses of active contributors, the input to the tree rebuild job.
    #[must_use]
    pub fn active_addresses(&self) -> Vec<Address> {
        let mut out: Vec<(u64, Address)> = self
            .public
            .values()
            .filter(|c| c.active)
            .map(|c| (c.registered_at, c.address))
            .collect();
        out.sort();
        out.into_iter().map(|(_, a)| a).collect()
    }
}

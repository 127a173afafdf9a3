//! Proposal and vote governance over batch acceptance.
//!
//! This is a separate state machine from [`crate::governance::ThresholdGovernance`].
//! The two share only the admin set, whose members are the voters here.
//! A proposal is open for a fixed period, after which anyone may finalize it.
//! It passes on a simple majority of yes over no votes.

use crate::error::{RegistryError, RegistryResult};
use crate::governance::AdminSet;
use ethers::types::Address;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProposalState {
    Active,
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub id: u64,
    pub batch_id: u64,
    pub proposer: Address,
    pub yes_votes: u64,
    pub no_votes: u64,
    pub voters: BTreeSet<Address>,
    pub created_at: u64,
    pub deadline: u64,
    pub state: ProposalState,
}

#[derive(Debug, Clone)]
pub struct VotingGovernance {
    voting_period: u64,
    proposals: Vec<Proposal>,
}

impl VotingGovernance {
    #[must_use]
    pub fn new(voting_period_secs: u64) -> Self {
        Self {
            voting_period: voting_period_secs,
            proposals: Vec::new(),
        }
    }

    #[must_use]
    pub fn voting_period(&self) -> u64 {
        self.voting_period
    }

    #[must_use]
    pub fn proposal_count(&self) -> u64 {
        self.proposals.len() as u64
    }

    #[must_use]
    pub fn get_proposal(&self, proposal_id: u64) -> Option<&Proposal> {
        usize::try_from(proposal_id)
            .ok()
            .and_then(|i| self.proposals.get(i))
    }

    fn proposal_mut(&mut self, proposal_id: u64) -> RegistryResult<&mut Proposal> {
        usize::try_from(proposal_id)
            .ok()
            .and_then(|i| self.proposals.get_mut(i))
            .ok_or_else(|| RegistryError::NotFound {
                kind: "proposal",
                id: proposal_id.to_string(),
            })
    }

    /// Opens a proposal to accept `batch_id`. Batch existence is checked by
    /// the caller, which owns the registry.
    pub fn create_proposal(
        &mut self,
        members: &AdminSet,
        caller: Address,
        batch_id: u64,
        now: u64,
    ) -> RegistryResult<u64> {
        members.ensure_admin(&caller)?;

        let id = self.proposals.len() as u64;
        let deadline = now.saturating_add(self.voting_period);
        self.proposals.push(Proposal {
            id,
            batch_id,
            proposer: caller,
            yes_votes: 0,
            no_votes: 0,
            voters: BTreeSet::new(),
            created_at: now,
            deadline,
            state: ProposalState::Active,
        });
        info!("Proposal {id} for batch {batch_id} opened by {caller:?}, closes at {deadline}");
        Ok(id)
    }

    pub fn vote(
        &mut self,
        members: &AdminSet,
        caller: Address,
        proposal_id: u64,
        support: bool,
        now: u64,
    ) -> RegistryResult<()> {
        members.ensure_admin(&caller)?;
        let proposal = self.proposal_mut(proposal_id)?;

        if proposal.state != ProposalState::Active {
            return Err(RegistryError::AlreadyFinalized(proposal_id));
        }
        if now >= proposal.deadline {
            return Err(RegistryError::VotingClosed(proposal_id));
        }
        if proposal.voters.contains(&caller) {
            return Err(RegistryError::DuplicateVote {
                proposal_id,
                member: format!("{caller:?}"),
            });
        }

        proposal.voters.insert(caller);
        if support {
            proposal.yes_votes += 1;
        } else {
            proposal.no_votes += 1;
        }
        info!(
            "Vote on proposal {proposal_id} by {caller:?}: {} (yes {}, no {})",
            if support { "yes" } else { "no" },
            proposal.yes_votes,
            proposal.no_votes
        );
        Ok(())
    }

    /// Closes a proposal whose voting period has elapsed. Callable by anyone.
    pub fn finalize_proposal(&mut self, proposal_id: u64, now: u64) -> RegistryResult<&Proposal> {
        let proposal = self.proposal_mut(proposal_id)?;

        if proposal.state != ProposalState::Active {
            return Err(RegistryError::AlreadyFinalized(proposal_id));
        }
        if now < proposal.deadline {
            return Err(RegistryError::VotingOpen(proposal_id));
        }

        proposal.state = if proposal.yes_votes > proposal.no_votes {
            ProposalState::Passed
        } else {
            ProposalState::Failed
        };
        if proposal.state == ProposalState::Passed {
            info!("Proposal {proposal_id} passed for batch {}", proposal.batch_id);
        } else {
            warn!(
                "Proposal {proposal_id} failed for batch {} (yes {}, no {})",
                proposal.batch_id, proposal.yes_votes, proposal.no_votes
            );
        }
        Ok(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::AdminPolicy;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn members() -> AdminSet {
        AdminSet::new(vec![addr(1), addr(2), addr(3)], 2, AdminPolicy::SingleAdmin).unwrap()
    }

    #[test]
    fn test_majority_passes_after_period() {
        let members = members();
        let mut voting = VotingGovernance::new(60);
        let id = voting.create_proposal(&members, addr(1), 4, 1000).unwrap();

        voting.vote(&members, addr(1), id, true, 1001).unwrap();
        voting.vote(&members, addr(2), id, true, 1002).unwrap();
        voting.vote(&members, addr(3), id, false, 1003).unwrap();

        assert_eq!(
            voting.finalize_proposal(id, 1059).unwrap_err(),
            RegistryError::VotingOpen(id)
        );
        let proposal = voting.finalize_proposal(id, 1060).unwrap();
        assert_eq!(proposal.state, ProposalState::Passed);
        assert_eq!(proposal.batch_id, 4);

        assert_eq!(
            voting.finalize_proposal(id, 1061).unwrap_err(),
            RegistryError::AlreadyFinalized(id)
        );
    }

    #[test]
    fn test_tie_fails() {
        let members = members();
        let mut voting = VotingGovernance::new(60);
        let id = voting.create_proposal(&members, addr(1), 0, 0).unwrap();
        voting.vote(&members, addr(1), id, true, 1).unwrap();
        voting.vote(&members, addr(2), id, false, 2).unwrap();
        assert_eq!(
            voting.finalize_proposal(id, 60).unwrap().state,
            ProposalState::Failed
        );
    }

    #[test]
    fn test_vote_rules() {
        let members = members();
        let mut voting = VotingGovernance::new(60);
        let id = voting.create_proposal(&members, addr(1), 0, 0).unwrap();

        assert!(matches!(
            voting.vote(&members, addr(9), id, true, 1),
            Err(RegistryError::Unauthorized(_))
        ));
        voting.vote(&members, addr(1), id, true, 1).unwrap();
        assert!(matches!(
            voting.vote(&members, addr(1), id, false, 2),
            Err(RegistryError::DuplicateVote { .. })
        ));
        assert_eq!(
            voting.vote(&members, addr(2), id, true, 60).unwrap_err(),
            RegistryError::VotingClosed(id)
        );
        assert!(matches!(
            voting.vote(&members, addr(2), 7, true, 1),
            Err(RegistryError::NotFound { .. })
        ));

        let proposal = voting.get_proposal(id).unwrap();
        assert_eq!(proposal.yes_votes, 1);
        assert_eq!(proposal.no_votes, 0);
    }

    #[test]
    fn test_only_members_propose() {
        let members = members();
        let mut voting = VotingGovernance::new(60);
        assert!(voting.create_proposal(&members, addr(7), 0, 0).is_err());
        assert_eq!(voting.proposal_count(), 0);
    }
}

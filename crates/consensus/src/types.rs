//! Snapshot and statistics types exposed by the state machines

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tpc_protocol::{Outcome, ParticipantState, Vote, VotePhase};
use tpc_txlog::Phase;

/// One vote per phase, as received from a participant or pinned on one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteRecord {
    pub can_commit: Option<Vote>,
    pub pre_commit: Option<Vote>,
}

impl VoteRecord {
    pub fn set(&mut self, phase: VotePhase, vote: Vote) {
        *self.slot(phase) = Some(vote);
    }

    pub fn get(&self, phase: VotePhase) -> Option<Vote> {
        match phase {
            VotePhase::CanCommit => self.can_commit,
            VotePhase::PreCommit => self.pre_commit,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.can_commit.is_none() && self.pre_commit.is_none()
    }

    fn slot(&mut self, phase: VotePhase) -> &mut Option<Vote> {
        match phase {
            VotePhase::CanCommit => &mut self.can_commit,
            VotePhase::PreCommit => &mut self.pre_commit,
        }
    }
}

/// Point-in-time view of a coordinator transaction
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSnapshot {
    pub transaction_id: String,
    pub outcome: Outcome,
    pub phase: Phase,
    pub participants: Vec<String>,
    pub votes: BTreeMap<String, VoteRecord>,
    /// Participants that have not acknowledged the decision
    pub pending: Vec<String>,
    pub created_at: i64,
    pub decided_at: Option<i64>,
}

/// Stats about the coordinator
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStats {
    pub transactions_started: u64,
    pub committed: u64,
    pub aborted: u64,
    pub redeliveries: u64,
    pub recovered: u64,
}

/// Fault injection settings of a participant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Vote returned regardless of the admission check
    pub forced_vote: Option<Vote>,
    /// Probability of failing a message: CanCommit is answered no, anything else is dropped
    pub failure_rate: f64,
    /// Votes pinned per transaction; these win over `forced_vote`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub manual_votes: BTreeMap<String, VoteRecord>,
}

impl FaultConfig {
    pub fn manual_vote(&self, transaction_id: &str, phase: VotePhase) -> Option<Vote> {
        self.manual_votes.get(transaction_id).and_then(|votes| votes.get(phase))
    }

    pub fn set_manual_vote(&mut self, transaction_id: &str, phase: VotePhase, vote: Option<Vote>) {
        let votes = self.manual_votes.entry(transaction_id.to_string()).or_default();
        *votes.slot(phase) = vote;
        if votes.is_empty() {
            self.manual_votes.remove(transaction_id);
        }
    }
}

/// Stats about a participant
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParticipantStats {
    pub votes_yes: u64,
    pub votes_no: u64,
    pub committed: u64,
    pub aborted: u64,
    pub dropped: u64,
    pub unilateral_aborts: u64,
    pub adopted_outcomes: u64,
}

/// Status report of a participant for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantStatus {
    pub id: String,
    pub crashed: bool,
    pub faults: FaultConfig,
    pub transactions: BTreeMap<String, ParticipantState>,
    pub stats: ParticipantStats,
}

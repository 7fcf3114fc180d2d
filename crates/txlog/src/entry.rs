//! Log entry format

use serde::{Deserialize, Serialize};
use tpc_protocol::{Data, Outcome, Vote};

/// Protocol phase a transaction has reached, as recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Transaction created (coordinator only)
    Started,
    /// CanCommit sent (coordinator) or answered (participant)
    CanCommit,
    /// PreCommit sent (coordinator) or prepared (participant)
    PreCommit,
    /// Terminal outcome decided
    Decided,
    /// Every participant acknowledged the decision (coordinator only)
    Finished,
}

/// Vote or outcome attached to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Vote(Vote),
    Outcome(Outcome),
}

/// A single append-only log record
///
/// The latest entry for a transaction id is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub transaction_id: String,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    /// Transaction payload, recorded on the entries recovery needs it from
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub payload: Data,
    /// Expected participants, recorded on the coordinator's `Started` entry
    ///
    /// An empty list is kept distinct from an absent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<String>>,
    /// Unix millis
    pub timestamp: i64,
}

impl LogEntry {
    /// Create an entry stamped with the current time
    pub fn new(transaction_id: impl Into<String>, phase: Phase) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            phase,
            decision: None,
            payload: Data::new(),
            participants: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_vote(mut self, vote: Vote) -> Self {
        self.decision = Some(Decision::Vote(vote));
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.decision = Some(Decision::Outcome(outcome));
        self
    }

    pub fn with_payload(mut self, payload: Data) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_participants(mut self, participants: Vec<String>) -> Self {
        self.participants = Some(participants);
        self
    }

    pub fn vote(&self) -> Option<Vote> {
        match self.decision {
            Some(Decision::Vote(vote)) => Some(vote),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self.decision {
            Some(Decision::Outcome(outcome)) => Some(outcome),
            _ => None,
        }
    }
}

//! Core types carried inside protocol messages

use serde::{Deserialize, Serialize};
use std::fmt;

/// Open string-keyed mapping used for message bodies and transaction payloads
pub type Data = serde_json::Map<String, serde_json::Value>;

/// First payload field whose value is not a string, number or boolean
///
/// Transaction payloads are flat; nested objects, arrays and null are refused.
pub fn non_scalar_field(payload: &Data) -> Option<&str> {
    payload
        .iter()
        .find(|(_, value)| !(value.is_string() || value.is_number() || value.is_boolean()))
        .map(|(key, _)| key.as_str())
}

/// A participant's answer to one voting phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Yes,
    No,
}

impl Vote {
    pub fn from_bool(yes: bool) -> Self {
        if yes {
            Vote::Yes
        } else {
            Vote::No
        }
    }

    pub fn is_yes(self) -> bool {
        matches!(self, Vote::Yes)
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::Yes => write!(f, "yes"),
            Vote::No => write!(f, "no"),
        }
    }
}

/// The two voting rounds of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VotePhase {
    CanCommit,
    PreCommit,
}

impl fmt::Display for VotePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VotePhase::CanCommit => write!(f, "CanCommit"),
            VotePhase::PreCommit => write!(f, "PreCommit"),
        }
    }
}

/// Final outcome of a transaction
///
/// Once a transaction is `Committed` or `Aborted` the value never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Committed,
    Aborted,
    #[default]
    Unknown,
}

impl Outcome {
    /// Whether this outcome is a terminal decision
    pub fn is_final(self) -> bool {
        !matches!(self, Outcome::Unknown)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Committed => write!(f, "committed"),
            Outcome::Aborted => write!(f, "aborted"),
            Outcome::Unknown => write!(f, "unknown"),
        }
    }
}

/// Participant-side protocol state for a single transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    /// No record of the transaction
    #[default]
    Idle,
    /// Voted yes to CanCommit, waiting for PreCommit
    CanCommitPending,
    /// Durably prepared, waiting for the decision
    PreCommitPending,
    Committed,
    Aborted,
    /// Prepared before a restart, outcome not yet learned
    Recovering,
}

impl ParticipantState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ParticipantState::Committed | ParticipantState::Aborted)
    }

    /// Outcome implied by this state
    pub fn outcome(self) -> Outcome {
        match self {
            ParticipantState::Committed => Outcome::Committed,
            ParticipantState::Aborted => Outcome::Aborted,
            _ => Outcome::Unknown,
        }
    }

    /// Whether reaching this state required a yes vote in `phase`
    pub fn implies_yes(self, phase: VotePhase) -> bool {
        match phase {
            VotePhase::CanCommit => matches!(
                self,
                ParticipantState::CanCommitPending
                    | ParticipantState::PreCommitPending
                    | ParticipantState::Recovering
                    | ParticipantState::Committed
            ),
            VotePhase::PreCommit => matches!(
                self,
                ParticipantState::PreCommitPending
                    | ParticipantState::Recovering
                    | ParticipantState::Committed
            ),
        }
    }
}

impl fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParticipantState::Idle => "IDLE",
            ParticipantState::CanCommitPending => "CAN_COMMIT_PENDING",
            ParticipantState::PreCommitPending => "PRE_COMMIT_PENDING",
            ParticipantState::Committed => "COMMITTED",
            ParticipantState::Aborted => "ABORTED",
            ParticipantState::Recovering => "RECOVERING",
        };
        f.write_str(name)
    }
}

/// Body of a STATE_RESPONSE message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateReport {
    pub state: ParticipantState,
    pub outcome: Outcome,
    /// Applied payload, present only for committed transactions
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub payload: Data,
}

impl StateReport {
    pub fn new(state: ParticipantState) -> Self {
        Self {
            state,
            outcome: state.outcome(),
            payload: Data::new(),
        }
    }

    pub fn with_payload(mut self, payload: Data) -> Self {
        self.payload = payload;
        self
    }
}

/// A decided transaction, as reported by history listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub transaction_id: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub payload: Data,
    /// Decision time (unix millis)
    pub timestamp: i64,
}

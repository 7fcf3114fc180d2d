//! Wire envelope and message kinds
//!
//! Every message is a JSON object `{msg_type, transaction_id, data}`. The
//! `msg_type` field is decoded into a closed enum so that an unrecognised
//! kind is rejected instead of silently defaulting.

use crate::error::{ProtocolError, Result};
use crate::types::{Data, HistoryRecord, StateReport, Vote, VotePhase};
use crate::{HISTORY_TRANSACTION_ID, REGISTER_TRANSACTION_ID};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// All message kinds exchanged between coordinator and participants
///
/// Legacy 2PC-style names (`PREPARE`, `COMMIT`, `CANCOMMIT_ABORT`,
/// `PRECOMMITABORT`) decode as aliases of the 3PC kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Coordinator -> participant
    #[serde(rename = "CanCommit", alias = "PREPARE")]
    CanCommit,
    #[serde(rename = "PreCommit")]
    PreCommit,
    #[serde(rename = "DoCommit", alias = "COMMIT")]
    DoCommit,
    #[serde(rename = "ABORT", alias = "CANCOMMIT_ABORT", alias = "PRECOMMITABORT")]
    Abort,
    #[serde(rename = "QUERY_STATE")]
    QueryState,
    #[serde(rename = "HISTORY_RESPONSE")]
    HistoryResponse,
    #[serde(rename = "REGISTERED")]
    Registered,

    // Participant -> coordinator
    #[serde(rename = "CANCOMMIT_VOTE_YES")]
    CanCommitVoteYes,
    #[serde(rename = "CANCOMMIT_VOTE_NO")]
    CanCommitVoteNo,
    #[serde(rename = "PRECOMMIT_VOTE_YES")]
    PreCommitVoteYes,
    #[serde(rename = "PRECOMMIT_VOTE_NO")]
    PreCommitVoteNo,
    #[serde(rename = "ACK_COMMIT")]
    AckCommit,
    #[serde(rename = "ACK_ABORT")]
    AckAbort,
    #[serde(rename = "STATE_RESPONSE")]
    StateResponse,
    #[serde(rename = "REQUEST_HISTORY")]
    RequestHistory,
    #[serde(rename = "REGISTER")]
    Register,
}

impl MessageType {
    /// Canonical wire name
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::CanCommit => "CanCommit",
            MessageType::PreCommit => "PreCommit",
            MessageType::DoCommit => "DoCommit",
            MessageType::Abort => "ABORT",
            MessageType::QueryState => "QUERY_STATE",
            MessageType::HistoryResponse => "HISTORY_RESPONSE",
            MessageType::Registered => "REGISTERED",
            MessageType::CanCommitVoteYes => "CANCOMMIT_VOTE_YES",
            MessageType::CanCommitVoteNo => "CANCOMMIT_VOTE_NO",
            MessageType::PreCommitVoteYes => "PRECOMMIT_VOTE_YES",
            MessageType::PreCommitVoteNo => "PRECOMMIT_VOTE_NO",
            MessageType::AckCommit => "ACK_COMMIT",
            MessageType::AckAbort => "ACK_ABORT",
            MessageType::StateResponse => "STATE_RESPONSE",
            MessageType::RequestHistory => "REQUEST_HISTORY",
            MessageType::Register => "REGISTER",
        }
    }

    /// Vote reply kind for a phase
    pub fn vote(phase: VotePhase, vote: Vote) -> Self {
        match (phase, vote) {
            (VotePhase::CanCommit, Vote::Yes) => MessageType::CanCommitVoteYes,
            (VotePhase::CanCommit, Vote::No) => MessageType::CanCommitVoteNo,
            (VotePhase::PreCommit, Vote::Yes) => MessageType::PreCommitVoteYes,
            (VotePhase::PreCommit, Vote::No) => MessageType::PreCommitVoteNo,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| ProtocolError::MalformedMessage(format!("unknown msg_type `{}`", s)))
    }
}

/// Message envelope exchanged on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub transaction_id: String,
    #[serde(default)]
    pub data: Data,
}

impl Message {
    pub fn new(msg_type: MessageType, transaction_id: impl Into<String>, data: Data) -> Self {
        Self {
            msg_type,
            transaction_id: transaction_id.into(),
            data,
        }
    }

    /// Message with an empty body
    pub fn empty(msg_type: MessageType, transaction_id: impl Into<String>) -> Self {
        Self::new(msg_type, transaction_id, Data::new())
    }

    pub fn can_commit(transaction_id: impl Into<String>, payload: Data) -> Self {
        Self::new(MessageType::CanCommit, transaction_id, payload)
    }

    pub fn pre_commit(transaction_id: impl Into<String>) -> Self {
        Self::empty(MessageType::PreCommit, transaction_id)
    }

    pub fn do_commit(transaction_id: impl Into<String>) -> Self {
        Self::empty(MessageType::DoCommit, transaction_id)
    }

    pub fn abort(transaction_id: impl Into<String>) -> Self {
        Self::empty(MessageType::Abort, transaction_id)
    }

    pub fn query_state(transaction_id: impl Into<String>) -> Self {
        Self::empty(MessageType::QueryState, transaction_id)
    }

    pub fn vote_reply(phase: VotePhase, transaction_id: impl Into<String>, vote: Vote) -> Self {
        Self::empty(MessageType::vote(phase, vote), transaction_id)
    }

    pub fn ack_commit(transaction_id: impl Into<String>) -> Self {
        Self::empty(MessageType::AckCommit, transaction_id)
    }

    pub fn ack_abort(transaction_id: impl Into<String>) -> Self {
        Self::empty(MessageType::AckAbort, transaction_id)
    }

    pub fn state_response(transaction_id: impl Into<String>, report: &StateReport) -> Self {
        Self::new(
            MessageType::StateResponse,
            transaction_id,
            to_object(report),
        )
    }

    pub fn request_history(participant_id: &str) -> Self {
        let mut data = Data::new();
        data.insert("participant_id".into(), Value::String(participant_id.to_string()));
        Self::new(MessageType::RequestHistory, HISTORY_TRANSACTION_ID, data)
    }

    pub fn history_response(records: &[HistoryRecord]) -> Self {
        let mut data = Data::new();
        data.insert(
            "history".into(),
            serde_json::to_value(records).expect("HistoryRecord serialization should not fail"),
        );
        Self::new(MessageType::HistoryResponse, HISTORY_TRANSACTION_ID, data)
    }

    pub fn register(participant_id: &str, address: &str) -> Self {
        let mut data = Data::new();
        data.insert("participant_id".into(), Value::String(participant_id.to_string()));
        data.insert("address".into(), Value::String(address.to_string()));
        Self::new(MessageType::Register, REGISTER_TRANSACTION_ID, data)
    }

    pub fn registered(participant_id: &str) -> Self {
        let mut data = Data::new();
        data.insert("participant_id".into(), Value::String(participant_id.to_string()));
        Self::new(MessageType::Registered, REGISTER_TRANSACTION_ID, data)
    }

    /// Classify a vote reply
    pub fn vote(&self) -> Option<(VotePhase, Vote)> {
        match self.msg_type {
            MessageType::CanCommitVoteYes => Some((VotePhase::CanCommit, Vote::Yes)),
            MessageType::CanCommitVoteNo => Some((VotePhase::CanCommit, Vote::No)),
            MessageType::PreCommitVoteYes => Some((VotePhase::PreCommit, Vote::Yes)),
            MessageType::PreCommitVoteNo => Some((VotePhase::PreCommit, Vote::No)),
            _ => None,
        }
    }

    /// Decode the body of a STATE_RESPONSE
    pub fn state_report(&self) -> Result<StateReport> {
        self.expect_type(MessageType::StateResponse)?;
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }

    /// Decode the body of a HISTORY_RESPONSE
    pub fn history(&self) -> Result<Vec<HistoryRecord>> {
        self.expect_type(MessageType::HistoryResponse)?;
        match self.data.get("history") {
            Some(history) => Ok(serde_json::from_value(history.clone())?),
            None => Ok(Vec::new()),
        }
    }

    /// String field from the body
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Serialize for network transmission
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Message serialization should not fail")
    }

    /// Deserialize from the network
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    fn expect_type(&self, expected: MessageType) -> Result<()> {
        if self.msg_type != expected {
            return Err(ProtocolError::MalformedMessage(format!(
                "expected {}, got {}",
                expected, self.msg_type
            )));
        }
        Ok(())
    }
}

fn to_object<T: Serialize>(value: &T) -> Data {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Data::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Outcome, ParticipantState};
    use serde_json::json;

    fn payload() -> Data {
        let mut data = Data::new();
        data.insert("account".into(), json!("alice"));
        data.insert("amount".into(), json!(100));
        data
    }

    #[test]
    fn encodes_canonical_field_names() {
        let msg = Message::can_commit("tx-1", payload());
        let value: Value = serde_json::from_str(&msg.to_json()).unwrap();

        assert_eq!(value["msg_type"], "CanCommit");
        assert_eq!(value["transaction_id"], "tx-1");
        assert_eq!(value["data"]["account"], "alice");
        assert_eq!(Message::from_json(&msg.to_json()).unwrap(), msg);
    }

    #[test]
    fn unknown_type_is_malformed() {
        let err = Message::from_json(r#"{"msg_type":"FOO","transaction_id":"t","data":{}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage(_)));
    }

    #[test]
    fn missing_transaction_id_is_malformed() {
        let err = Message::from_json(r#"{"msg_type":"CanCommit","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage(_)));
    }

    #[test]
    fn non_object_input_is_malformed() {
        assert!(Message::from_json("[1,2,3]").is_err());
        assert!(Message::from_json("not json").is_err());
    }

    #[test]
    fn missing_data_defaults_to_empty() {
        let msg = Message::from_json(r#"{"msg_type":"QUERY_STATE","transaction_id":"t"}"#).unwrap();
        assert_eq!(msg.msg_type, MessageType::QueryState);
        assert!(msg.data.is_empty());
    }

    #[test]
    fn legacy_names_decode_as_aliases() {
        let cases = [
            ("PREPARE", MessageType::CanCommit),
            ("COMMIT", MessageType::DoCommit),
            ("CANCOMMIT_ABORT", MessageType::Abort),
            ("PRECOMMITABORT", MessageType::Abort),
        ];
        for (name, expected) in cases {
            let raw = format!(r#"{{"msg_type":"{}","transaction_id":"t"}}"#, name);
            assert_eq!(Message::from_json(&raw).unwrap().msg_type, expected);
            assert_eq!(name.parse::<MessageType>().unwrap(), expected);
        }
        // re-encoding always uses the canonical name
        let msg = Message::from_json(r#"{"msg_type":"COMMIT","transaction_id":"t"}"#).unwrap();
        assert!(msg.to_json().contains("\"DoCommit\""));
    }

    #[test]
    fn classifies_votes() {
        let yes = Message::vote_reply(VotePhase::PreCommit, "t", Vote::Yes);
        assert_eq!(yes.msg_type, MessageType::PreCommitVoteYes);
        assert_eq!(yes.vote(), Some((VotePhase::PreCommit, Vote::Yes)));
        assert_eq!(Message::ack_commit("t").vote(), None);
    }

    #[test]
    fn state_report_body() {
        let report = StateReport::new(ParticipantState::Committed).with_payload(payload());
        let msg = Message::state_response("t", &report);

        let decoded = Message::from_json(&msg.to_json()).unwrap().state_report().unwrap();
        assert_eq!(decoded.state, ParticipantState::Committed);
        assert_eq!(decoded.outcome, Outcome::Committed);
        assert_eq!(decoded.payload, payload());

        assert!(Message::ack_abort("t").state_report().is_err());
    }

    #[test]
    fn history_body() {
        let records = vec![HistoryRecord {
            transaction_id: "a1b2c3d4".into(),
            outcome: Outcome::Aborted,
            payload: payload(),
            timestamp: 1_700_000_000_000,
        }];
        let msg = Message::history_response(&records);
        assert_eq!(msg.transaction_id, HISTORY_TRANSACTION_ID);
        assert_eq!(msg.history().unwrap(), records);
    }

    #[test]
    fn register_carries_address() {
        let msg = Message::register("P1", "127.0.0.1:6001");
        assert_eq!(msg.data_str("participant_id"), Some("P1"));
        assert_eq!(msg.data_str("address"), Some("127.0.0.1:6001"));
    }
}

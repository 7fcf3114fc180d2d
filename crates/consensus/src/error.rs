//! Consensus Errors

use thiserror::Error;
use tpc_protocol::{MessageType, ProtocolError};
use tpc_txlog::LogError;

/// Failures delivering a message and receiving its reply
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Participant unreachable: {0}")]
    Unreachable(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("No reply from {0}")]
    NoReply(String),

    #[error("Connection closed by {0}")]
    Closed(String),

    #[error("Malformed reply: {0}")]
    Malformed(#[from] ProtocolError),
}

/// Reasons a participant produced no reply
#[derive(Error, Debug)]
pub enum ParticipantError {
    #[error("Participant {0} is crashed")]
    Crashed(String),

    #[error("Message for {0} dropped by fault injection")]
    Dropped(String),

    #[error("Log failure: {0}")]
    Log(#[from] LogError),

    #[error("Participants do not handle {0}")]
    UnexpectedMessage(MessageType),
}

/// Coordinator errors surfaced to clients
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Payload field {0:?} must be a string, number or boolean")]
    InvalidPayload(String),

    #[error("Coordinator is crashed")]
    Crashed,

    #[error("Log failure: {0}")]
    Log(#[from] LogError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

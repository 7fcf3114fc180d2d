//! Shared wire vocabulary for the three-phase commit protocol
//!
//! This crate contains the envelope exchanged between the coordinator and
//! its participants, plus the small domain types carried inside it:
//! - `Message` / `MessageType`: the closed set of request and reply kinds
//! - `Vote`, `Outcome`, `ParticipantState`: protocol values
//! - `StateReport`, `HistoryRecord`: typed bodies of STATE_RESPONSE and HISTORY_RESPONSE

pub mod error;
pub mod message;
pub mod types;

pub use error::{ProtocolError, Result};
pub use message::{Message, MessageType};
pub use types::{
    non_scalar_field, Data, HistoryRecord, Outcome, ParticipantState, StateReport, Vote,
    VotePhase,
};

/// Transaction id used by HISTORY exchanges, which are not bound to a transaction
pub const HISTORY_TRANSACTION_ID: &str = "HISTORY";

/// Transaction id used by participant registration exchanges
pub const REGISTER_TRANSACTION_ID: &str = "REGISTER";

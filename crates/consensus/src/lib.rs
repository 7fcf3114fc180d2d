//! 3PC Consensus - coordinator and participant state machines
//!
//! Architecture:
//! - The coordinator runs one task per transaction: CanCommit, PreCommit, then DoCommit or ABORT
//! - Participants vote, prepare durably, and apply the decision they are sent
//! - Every transition is logged before the next message goes out; both sides recover from their log
//! - Participants terminate on their own only when it is safe (see `termination`)

pub mod coordinator;
pub mod error;
pub mod network;
pub mod participant;
pub mod registry;
pub mod retry;
pub mod termination;
pub mod transport;
pub mod types;

#[cfg(test)]
mod tests;

pub use coordinator::Coordinator;
pub use error::{CoordinatorError, ParticipantError, TransportError};
pub use network::{request, CoordinatorClient, MessageServer, WsTransport};
pub use participant::{AdmissionCheck, NonEmptyPayload, Participant};
pub use registry::{AckMark, ParticipantRecord, ParticipantRegistry};
pub use retry::{RetryPolicy, TerminationMode};
pub use termination::{run_termination_monitor, OutcomeSource, PeerSource};
pub use transport::{LocalTransport, MessageHandler, Transport};
pub use types::*;

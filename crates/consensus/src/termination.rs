//! Participant-side termination: unilateral abort of unprepared work and
//! outcome discovery for prepared work whose coordinator went silent.

use crate::error::TransportError;
use crate::participant::Participant;
use crate::registry::ParticipantRecord;
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tpc_protocol::{Message, MessageType, Outcome};

/// Something that may know the decided outcome of a transaction
#[async_trait]
pub trait OutcomeSource: Send + Sync {
    fn name(&self) -> String;

    /// The outcome this source knows, `Outcome::Unknown` if none
    async fn outcome(&self, transaction_id: &str) -> Result<Outcome, TransportError>;
}

/// Another participant, asked with QUERY_STATE
pub struct PeerSource {
    peer: ParticipantRecord,
    transport: Arc<dyn Transport>,
}

impl PeerSource {
    pub fn new(peer: ParticipantRecord, transport: Arc<dyn Transport>) -> Self {
        Self { peer, transport }
    }
}

#[async_trait]
impl OutcomeSource for PeerSource {
    fn name(&self) -> String {
        format!("peer {}", self.peer.id)
    }

    async fn outcome(&self, transaction_id: &str) -> Result<Outcome, TransportError> {
        let reply = self
            .transport
            .send(&self.peer, Message::query_state(transaction_id))
            .await?;
        outcome_from_reply(&reply)
    }
}

/// Read the outcome carried by a STATE_RESPONSE
pub(crate) fn outcome_from_reply(reply: &Message) -> Result<Outcome, TransportError> {
    match reply.msg_type {
        MessageType::StateResponse => Ok(reply.state_report()?.outcome),
        _ => Ok(Outcome::Unknown),
    }
}

/// Periodically run both termination rules until the task is aborted
pub async fn run_termination_monitor(
    participant: Arc<Participant>,
    sources: Vec<Arc<dyn OutcomeSource>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if participant.is_crashed() {
            continue;
        }

        let expired = participant.expire_waiting();
        if !expired.is_empty() {
            tracing::info!("Unilaterally aborted {} waiting transactions", expired.len());
        }

        let blocked = participant.blocked();
        if blocked.is_empty() {
            continue;
        }
        let resolved = participant.resolve_blocked(&sources).await;
        if resolved.len() < blocked.len() {
            tracing::warn!(
                "Participant {} blocked on {} prepared transactions",
                participant.id(),
                blocked.len() - resolved.len()
            );
        }
    }
}

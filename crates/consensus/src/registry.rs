//! Coordinator-side registry of known participants

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tpc_txlog::Phase;

/// Last acknowledgement received from a participant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AckMark {
    pub transaction_id: String,
    pub phase: Phase,
}

/// A registered participant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantRecord {
    pub id: String,
    /// Network address used by the transport
    pub address: String,
    pub last_ack: Option<AckMark>,
    /// In-flight transactions whose decision could not be delivered
    pub unreachable_for: BTreeSet<String>,
}

impl ParticipantRecord {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            last_ack: None,
            unreachable_for: BTreeSet::new(),
        }
    }

    pub fn is_unreachable(&self) -> bool {
        !self.unreachable_for.is_empty()
    }
}

/// Participant table, ordered by id
#[derive(Default)]
pub struct ParticipantRegistry {
    participants: RwLock<BTreeMap<String, ParticipantRecord>>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from static `(id, address)` pairs
    pub fn with_participants<I, S>(participants: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let registry = Self::new();
        for (id, address) in participants {
            registry.register(id, address);
        }
        registry
    }

    /// Register a participant, or update the address of a known one
    ///
    /// Returns true when the participant was already registered.
    pub fn register(&self, id: impl Into<String>, address: impl Into<String>) -> bool {
        let id = id.into();
        let address = address.into();
        let mut participants = self.participants.write();

        match participants.get_mut(&id) {
            Some(record) => {
                if record.address != address {
                    tracing::info!(
                        "Participant {} moved from {} to {}",
                        id,
                        record.address,
                        address
                    );
                    record.address = address;
                }
                true
            }
            None => {
                tracing::info!("Registered participant {} at {}", id, address);
                participants.insert(id.clone(), ParticipantRecord::new(id, address));
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<ParticipantRecord> {
        self.participants.read().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.participants.read().keys().cloned().collect()
    }

    pub fn records(&self) -> Vec<ParticipantRecord> {
        self.participants.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.participants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.read().is_empty()
    }

    /// Record a delivered acknowledgement and clear the unreachable mark
    pub fn record_ack(&self, id: &str, transaction_id: &str, phase: Phase) {
        if let Some(record) = self.participants.write().get_mut(id) {
            record.unreachable_for.remove(transaction_id);
            record.last_ack = Some(AckMark {
                transaction_id: transaction_id.to_string(),
                phase,
            });
        }
    }

    pub fn mark_unreachable(&self, id: &str, transaction_id: &str) {
        if let Some(record) = self.participants.write().get_mut(id) {
            record.unreachable_for.insert(transaction_id.to_string());
        }
    }

    /// Participants with undelivered decisions, with the affected transactions
    pub fn unreachable(&self) -> Vec<(String, Vec<String>)> {
        self.participants
            .read()
            .values()
            .filter(|r| r.is_unreachable())
            .map(|r| (r.id.clone(), r.unreachable_for.iter().cloned().collect()))
            .collect()
    }
}

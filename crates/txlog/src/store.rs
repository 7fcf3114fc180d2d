//! In-memory store of applied transaction payloads using DashMap for concurrent access

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tpc_protocol::Data;

/// Thread-safe store of committed transaction data
///
/// A participant applies a transaction's payload here when it commits. The
/// store is rebuilt from the log on restart.
#[derive(Clone, Default)]
pub struct CommittedStore {
    /// Applied payloads by transaction id
    data: Arc<DashMap<String, Data>>,
    /// When each transaction was applied (unix millis)
    applied_at: Arc<DashMap<String, i64>>,
}

impl CommittedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed payload; re-applying the same id is a no-op
    pub fn apply(&self, transaction_id: &str, payload: Data, timestamp: i64) -> bool {
        if self.data.contains_key(transaction_id) {
            return false;
        }
        self.data.insert(transaction_id.to_string(), payload);
        self.applied_at.insert(transaction_id.to_string(), timestamp);
        true
    }

    pub fn get(&self, transaction_id: &str) -> Option<Data> {
        self.data.get(transaction_id).map(|r| r.value().clone())
    }

    pub fn applied_at(&self, transaction_id: &str) -> Option<i64> {
        self.applied_at.get(transaction_id).map(|r| *r.value())
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.data.contains_key(transaction_id)
    }

    /// All applied payloads, ordered by transaction id
    pub fn snapshot(&self) -> BTreeMap<String, Data> {
        self.data
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.data.clear();
        self.applied_at.clear();
    }
}

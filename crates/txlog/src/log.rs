//! The transaction log seam and its in-memory implementation

use crate::entry::{Decision, LogEntry, Phase};
use crate::error::{LogError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use tpc_protocol::{Data, Outcome, Vote};

/// Append-only storage of protocol transitions
///
/// This abstraction allows the same state machines to run against:
/// - a sled database (nodes)
/// - memory with fault injection (testing)
///
/// `append` must not return before the entry is durable: callers send the
/// next protocol message only after it succeeds.
pub trait TransactionLog: Send + Sync {
    /// Durably append an entry
    fn append(&self, entry: &LogEntry) -> Result<()>;

    /// Every entry, in append order
    fn replay(&self) -> Result<Vec<LogEntry>>;

    /// Entries for one transaction, in append order
    fn entries(&self, transaction_id: &str) -> Result<Vec<LogEntry>> {
        Ok(self
            .replay()?
            .into_iter()
            .filter(|e| e.transaction_id == transaction_id)
            .collect())
    }

    /// The authoritative (latest) entry for a transaction
    fn latest(&self, transaction_id: &str) -> Result<Option<LogEntry>> {
        Ok(self.entries(transaction_id)?.pop())
    }

    /// Whether any entry exists for a transaction
    fn contains(&self, transaction_id: &str) -> Result<bool> {
        Ok(self.latest(transaction_id)?.is_some())
    }

    /// Flush pending writes to stable storage
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Per-transaction state reconstructed from the log
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedTransaction {
    pub transaction_id: String,
    /// Latest phase reached
    pub phase: Phase,
    /// Decision carried by the latest entry
    pub decision: Option<Decision>,
    /// Terminal outcome, if one was ever logged
    pub outcome: Outcome,
    /// Latest payload recorded for the transaction
    pub payload: Data,
    /// Expected participants; `None` when no `Started` entry was logged
    pub participants: Option<Vec<String>>,
    pub can_commit_vote: Option<Vote>,
    pub pre_commit_vote: Option<Vote>,
    pub started_at: i64,
    pub updated_at: i64,
}

impl ReplayedTransaction {
    fn new(entry: &LogEntry) -> Self {
        Self {
            transaction_id: entry.transaction_id.clone(),
            phase: entry.phase,
            decision: None,
            outcome: Outcome::Unknown,
            payload: Data::new(),
            participants: None,
            can_commit_vote: None,
            pre_commit_vote: None,
            started_at: entry.timestamp,
            updated_at: entry.timestamp,
        }
    }

    fn apply(&mut self, entry: &LogEntry) {
        self.phase = entry.phase;
        self.decision = entry.decision;
        self.updated_at = entry.timestamp;

        if !entry.payload.is_empty() {
            self.payload = entry.payload.clone();
        }
        if let Some(participants) = &entry.participants {
            self.participants = Some(participants.clone());
        } else if entry.phase == Phase::Started {
            self.participants = Some(Vec::new());
        }
        match (entry.phase, entry.decision) {
            (Phase::CanCommit, Some(Decision::Vote(vote))) => self.can_commit_vote = Some(vote),
            (Phase::PreCommit, Some(Decision::Vote(vote))) => self.pre_commit_vote = Some(vote),
            (_, Some(Decision::Outcome(outcome))) if outcome.is_final() => {
                self.outcome = outcome
            }
            _ => {}
        }
    }

    /// Whether the log holds a terminal decision for this transaction
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_final()
    }
}

/// Fold the whole log into per-transaction state, in first-seen order
pub fn replay_log(log: &dyn TransactionLog) -> Result<Vec<ReplayedTransaction>> {
    let mut order: Vec<ReplayedTransaction> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in log.replay()? {
        let slot = *index.entry(entry.transaction_id.clone()).or_insert_with(|| {
            order.push(ReplayedTransaction::new(&entry));
            order.len() - 1
        });
        order[slot].apply(&entry);
    }

    Ok(order)
}

// -- in-memory implementation --

/// In-memory log for testing
///
/// Writes can be made to fail, either all of them or only those for one
/// phase, to exercise the "log failure aborts the send" paths.
#[derive(Default)]
pub struct MemoryLog {
    entries: RwLock<MemoryEntries>,
    fail_all: RwLock<bool>,
    failing_phase: RwLock<Option<Phase>>,
}

#[derive(Default)]
struct MemoryEntries {
    all: Vec<LogEntry>,
    /// Positions in `all`, per transaction
    by_transaction: HashMap<String, Vec<usize>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent write
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_all.write() = fail;
    }

    /// Reject writes of entries in `phase`
    pub fn set_failing_phase(&self, phase: Option<Phase>) {
        *self.failing_phase.write() = phase;
    }

    pub fn len(&self) -> usize {
        self.entries.read().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().all.is_empty()
    }
}

impl TransactionLog for MemoryLog {
    fn append(&self, entry: &LogEntry) -> Result<()> {
        if *self.fail_all.read() || *self.failing_phase.read() == Some(entry.phase) {
            return Err(LogError::WriteRejected(format!(
                "{:?} entry for {}",
                entry.phase, entry.transaction_id
            )));
        }
        let mut entries = self.entries.write();
        let position = entries.all.len();
        entries.all.push(entry.clone());
        entries
            .by_transaction
            .entry(entry.transaction_id.clone())
            .or_default()
            .push(position);
        Ok(())
    }

    fn replay(&self) -> Result<Vec<LogEntry>> {
        Ok(self.entries.read().all.clone())
    }

    fn entries(&self, transaction_id: &str) -> Result<Vec<LogEntry>> {
        let entries = self.entries.read();
        Ok(entries
            .by_transaction
            .get(transaction_id)
            .map(|positions| positions.iter().map(|&i| entries.all[i].clone()).collect())
            .unwrap_or_default())
    }

    fn latest(&self, transaction_id: &str) -> Result<Option<LogEntry>> {
        let entries = self.entries.read();
        Ok(entries
            .by_transaction
            .get(transaction_id)
            .and_then(|positions| positions.last())
            .map(|&i| entries.all[i].clone()))
    }

    fn contains(&self, transaction_id: &str) -> Result<bool> {
        Ok(self.entries.read().by_transaction.contains_key(transaction_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Data {
        let mut data = Data::new();
        data.insert("key".into(), json!("value"));
        data
    }

    #[test]
    fn latest_entry_is_authoritative() {
        let log = MemoryLog::new();
        log.append(&LogEntry::new("t1", Phase::Started)).unwrap();
        log.append(&LogEntry::new("t2", Phase::Started)).unwrap();
        log.append(&LogEntry::new("t1", Phase::CanCommit)).unwrap();

        assert_eq!(log.latest("t1").unwrap().unwrap().phase, Phase::CanCommit);
        assert_eq!(log.entries("t2").unwrap().len(), 1);
        assert!(log.latest("missing").unwrap().is_none());
        assert!(!log.contains("missing").unwrap());

        log.set_failing_phase(Some(Phase::Decided));
        assert!(log.append(&LogEntry::new("t3", Phase::Decided)).is_err());
        assert!(!log.contains("t3").unwrap());
        assert_eq!(log.entries("t1").unwrap().len(), 2);
    }

    #[test]
    fn replay_folds_per_transaction() {
        let log = MemoryLog::new();
        log.append(
            &LogEntry::new("t1", Phase::Started)
                .with_payload(payload())
                .with_participants(vec!["P1".into(), "P2".into()]),
        )
        .unwrap();
        log.append(&LogEntry::new("t2", Phase::CanCommit).with_vote(Vote::No)).unwrap();
        log.append(&LogEntry::new("t1", Phase::CanCommit)).unwrap();
        log.append(&LogEntry::new("t1", Phase::Decided).with_outcome(Outcome::Committed))
            .unwrap();
        log.append(&LogEntry::new("t1", Phase::Finished)).unwrap();

        let replayed = replay_log(&log).unwrap();
        assert_eq!(replayed.len(), 2);

        let t1 = &replayed[0];
        assert_eq!(t1.transaction_id, "t1");
        assert_eq!(t1.phase, Phase::Finished);
        assert_eq!(t1.outcome, Outcome::Committed);
        assert!(t1.is_resolved());
        assert_eq!(t1.payload, payload());
        assert_eq!(t1.participants, Some(vec!["P1".to_string(), "P2".to_string()]));

        let t2 = &replayed[1];
        assert_eq!(t2.participants, None);
        assert_eq!(t2.can_commit_vote, Some(Vote::No));
        assert!(!t2.is_resolved());
    }

    #[test]
    fn failing_writes_are_rejected() {
        let log = MemoryLog::new();
        log.set_failing_phase(Some(Phase::Decided));

        assert!(log.append(&LogEntry::new("t", Phase::CanCommit)).is_ok());
        assert!(matches!(
            log.append(&LogEntry::new("t", Phase::Decided)),
            Err(LogError::WriteRejected(_))
        ));

        log.set_failing_phase(None);
        log.set_fail_writes(true);
        assert!(log.append(&LogEntry::new("t", Phase::PreCommit)).is_err());
        assert_eq!(log.len(), 1);
    }
}

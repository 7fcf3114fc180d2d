//! Persistence Layer for the Transaction Log
//!
//! Uses the sled embedded database so that protocol state survives restarts.
//! Entries are keyed by a monotonically increasing sequence number, which
//! keeps iteration in append order. A second tree indexes the sequence
//! numbers by transaction id, so per-transaction lookups never scan the log.

use crate::entry::LogEntry;
use crate::error::{LogError, Result};
use crate::log::TransactionLog;
use crate::{INDEX_TREE, LOG_TREE};
use sled::Db;
use std::path::Path;

/// Durable transaction log backed by sled
pub struct SledLog {
    /// Sled database instance
    db: Db,
    /// Log entries tree
    entries: sled::Tree,
    /// Transaction id -> sequence numbers of its entries
    index: sled::Tree,
}

impl SledLog {
    /// Open or create a log at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(&path)?;
        let entries = db.open_tree(LOG_TREE)?;
        let index = db.open_tree(INDEX_TREE)?;

        let log = Self { db, entries, index };
        let count = log.entries.len();
        if log.index.len() != count {
            log.rebuild_index()?;
        }

        tracing::info!(
            "Opened transaction log at {:?} ({} entries)",
            path.as_ref(),
            count
        );

        Ok(log)
    }

    /// Re-derive the index from the entries tree
    ///
    /// Needed when a crash landed between an entry write and its index write.
    fn rebuild_index(&self) -> Result<()> {
        tracing::warn!("Rebuilding transaction log index");
        self.index.clear()?;
        for result in self.entries.iter() {
            let (key, value) = result?;
            let entry = Self::decode(&key, &value)?;
            let key = index_key(&entry.transaction_id, seq_of(&key)?);
            self.index.insert(key, Vec::<u8>::new())?;
        }
        self.index.flush()?;
        Ok(())
    }

    /// Sequence numbers of one transaction's entries, in append order
    fn sequence_keys(&self, transaction_id: &str) -> impl DoubleEndedIterator<Item = Result<[u8; 8]>> {
        self.index
            .scan_prefix(index_prefix(transaction_id))
            .map(|result| {
                let (key, _) = result?;
                let start = key.len().saturating_sub(8);
                seq_of(&key[start..]).map(u64::to_be_bytes)
            })
    }

    fn entry_at(&self, seq: [u8; 8]) -> Result<LogEntry> {
        match self.entries.get(seq)? {
            Some(value) => Self::decode(&seq, &value),
            None => Err(LogError::CorruptKey(format!(
                "index points at missing seq {}",
                u64::from_be_bytes(seq)
            ))),
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) -> Result<()> {
        self.entries.clear()?;
        self.index.clear()?;
        Ok(())
    }

    fn decode(key: &[u8], value: &[u8]) -> Result<LogEntry> {
        seq_of(key)?;
        Ok(serde_json::from_slice(value)?)
    }
}

fn seq_of(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| LogError::CorruptKey(format!("{} byte key", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Length-prefixed id, so no id is a prefix of another
fn index_prefix(transaction_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + transaction_id.len() + 8);
    key.extend_from_slice(&(transaction_id.len() as u32).to_be_bytes());
    key.extend_from_slice(transaction_id.as_bytes());
    key
}

fn index_key(transaction_id: &str, seq: u64) -> Vec<u8> {
    let mut key = index_prefix(transaction_id);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

impl TransactionLog for SledLog {
    fn append(&self, entry: &LogEntry) -> Result<()> {
        let seq = self.db.generate_id()?;
        let value = serde_json::to_vec(entry)?;
        self.entries.insert(seq.to_be_bytes(), value)?;
        self.index.insert(index_key(&entry.transaction_id, seq), Vec::<u8>::new())?;

        // an entry must be on disk before the caller acts on it
        self.entries.flush()?;
        self.index.flush()?;

        tracing::trace!(
            "Logged {:?} for {} at seq {}",
            entry.phase,
            entry.transaction_id,
            seq
        );
        Ok(())
    }

    fn replay(&self) -> Result<Vec<LogEntry>> {
        let mut out = Vec::with_capacity(self.entries.len());
        for result in self.entries.iter() {
            let (key, value) = result?;
            out.push(Self::decode(&key, &value)?);
        }
        Ok(out)
    }

    fn entries(&self, transaction_id: &str) -> Result<Vec<LogEntry>> {
        self.sequence_keys(transaction_id)
            .map(|seq| self.entry_at(seq?))
            .collect()
    }

    fn latest(&self, transaction_id: &str) -> Result<Option<LogEntry>> {
        match self.sequence_keys(transaction_id).next_back() {
            Some(seq) => Ok(Some(self.entry_at(seq?)?)),
            None => Ok(None),
        }
    }

    fn contains(&self, transaction_id: &str) -> Result<bool> {
        Ok(self.sequence_keys(transaction_id).next().transpose()?.is_some())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

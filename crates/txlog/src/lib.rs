//! Transaction Log - durable protocol state for 3PC nodes
//!
//! This crate provides the storage side of the protocol:
//! - `LogEntry`: one append-only record of a phase transition
//! - `TransactionLog`: the storage seam, with `SledLog` (on disk) and `MemoryLog` (tests)
//! - `replay_log`: folds the log into per-transaction state for crash recovery
//! - `CommittedStore`: a participant's applied transaction payloads

pub mod entry;
pub mod error;
pub mod log;
pub mod persistence;
pub mod store;

pub use entry::{Decision, LogEntry, Phase};
pub use error::{LogError, Result};
pub use log::{replay_log, MemoryLog, ReplayedTransaction, TransactionLog};
pub use persistence::SledLog;
pub use store::CommittedStore;

/// Name of the sled tree holding log entries
pub const LOG_TREE: &str = "txlog";

/// Name of the sled tree indexing log entries by transaction id
pub const INDEX_TREE: &str = "txlog_index";

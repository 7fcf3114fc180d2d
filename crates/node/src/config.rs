//! Node Configuration

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tpc_consensus::{RetryPolicy, TerminationMode};

/// Node configuration, loaded from an optional JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub id: String,
    /// Protocol (WebSocket) bind address
    pub listen: String,
    /// HTTP control bind address
    pub control_addr: String,
    /// Coordinator protocol address (participant mode)
    pub coordinator_addr: String,
    /// Static participant registry: id -> protocol address
    pub participants: BTreeMap<String, String>,
    /// Directory holding the durable logs
    pub data_dir: PathBuf,
    pub phase_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub max_redeliveries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub wait_timeout_ms: u64,
    pub termination: TerminationMode,
    /// Fault injection probability applied at startup (participant mode)
    pub failure_rate: f64,
    /// Period of the coordinator's decision redelivery sweep
    pub redelivery_interval_ms: u64,
    /// Period of the participant's termination monitor
    pub termination_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            id: "node".to_string(),
            listen: "127.0.0.1:7000".to_string(),
            control_addr: "127.0.0.1:8000".to_string(),
            coordinator_addr: "127.0.0.1:7000".to_string(),
            participants: BTreeMap::new(),
            data_dir: PathBuf::from("./data"),
            phase_timeout_ms: policy.phase_timeout.as_millis() as u64,
            ack_timeout_ms: policy.ack_timeout.as_millis() as u64,
            max_redeliveries: policy.max_redeliveries,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            wait_timeout_ms: policy.wait_timeout.as_millis() as u64,
            termination: policy.termination,
            failure_rate: 0.0,
            redelivery_interval_ms: 2_000,
            termination_interval_ms: 1_000,
        }
    }
}

impl NodeConfig {
    /// Load a config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {:?}", path))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            phase_timeout: Duration::from_millis(self.phase_timeout_ms),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            max_redeliveries: self.max_redeliveries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            wait_timeout: Duration::from_millis(self.wait_timeout_ms),
            termination: self.termination,
        }
    }

    /// Durable log location of this node
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("node id must not be empty");
        }
        if self.phase_timeout_ms == 0 || self.ack_timeout_ms == 0 {
            bail!("timeouts must be positive");
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            bail!("failure rate must be within [0, 1], got {}", self.failure_rate);
        }
        Ok(())
    }
}

/// Parse a `ID=ADDR` participant entry
pub fn parse_participant(entry: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((id, addr)) if !id.trim().is_empty() && !addr.trim().is_empty() => {
            Ok((id.trim().to_string(), addr.trim().to_string()))
        }
        _ => bail!("expected ID=ADDR, got {:?}", entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: NodeConfig = serde_json::from_str(
            r#"{
                "id": "C",
                "phase_timeout_ms": 750,
                "termination": "cooperative",
                "participants": { "P1": "127.0.0.1:7101" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.id, "C");
        assert_eq!(config.participants["P1"], "127.0.0.1:7101");
        assert_eq!(config.control_addr, NodeConfig::default().control_addr);

        let policy = config.retry_policy();
        assert_eq!(policy.phase_timeout, Duration::from_millis(750));
        assert_eq!(policy.termination, TerminationMode::Cooperative);
        assert_eq!(policy.max_redeliveries, RetryPolicy::default().max_redeliveries);
    }

    #[test]
    fn default_policy_round_trips() {
        let policy = NodeConfig::default().retry_policy();
        let expected = RetryPolicy::default();
        assert_eq!(policy.phase_timeout, expected.phase_timeout);
        assert_eq!(policy.wait_timeout, expected.wait_timeout);
        assert_eq!(policy.max_backoff, expected.max_backoff);
    }

    #[test]
    fn validation() {
        let mut config = NodeConfig::default();
        assert!(config.validate().is_ok());

        config.failure_rate = 1.5;
        assert!(config.validate().is_err());

        config.failure_rate = 0.2;
        config.id = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn participant_entries() {
        assert_eq!(
            parse_participant("P1=127.0.0.1:7101").unwrap(),
            ("P1".to_string(), "127.0.0.1:7101".to_string())
        );
        assert!(parse_participant("P1").is_err());
        assert!(parse_participant("=addr").is_err());
    }

    #[test]
    fn log_path_is_per_node() {
        let config = NodeConfig {
            id: "P2".into(),
            data_dir: PathBuf::from("/tmp/tpc"),
            ..Default::default()
        };
        assert_eq!(config.log_path(), PathBuf::from("/tmp/tpc/P2"));
    }
}

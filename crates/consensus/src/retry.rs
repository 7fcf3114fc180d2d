//! Timeout and retry policy shared by coordinator and participants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a prepared participant does when the coordinator goes silent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationMode {
    /// Stay prepared until the coordinator (or its history) delivers the outcome
    #[default]
    Block,
    /// Ask the coordinator's history and peer participants for a terminal outcome
    Cooperative,
}

/// Timing configuration for the protocol
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// How long the coordinator waits for all votes of one phase
    pub phase_timeout: Duration,
    /// How long one decision delivery waits for its acknowledgement
    pub ack_timeout: Duration,
    /// Delivery attempts after the first before a participant is marked unreachable
    pub max_redeliveries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Silence a participant tolerates before running termination
    pub wait_timeout: Duration,
    pub termination: TerminationMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            phase_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(2),
            max_redeliveries: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(60),
            termination: TerminationMode::Block,
        }
    }
}

impl RetryPolicy {
    /// Delay before redelivery attempt `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn with_termination(mut self, termination: TerminationMode) -> Self {
        self.termination = termination;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(1600));
        assert_eq!(policy.backoff(5), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn defaults_block() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.termination, TerminationMode::Block);
        assert_eq!(policy.wait_timeout, Duration::from_secs(60));
    }
}

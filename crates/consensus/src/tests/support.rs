//! Cluster fixture shared by the scenario tests

use crate::coordinator::Coordinator;
use crate::participant::Participant;
use crate::registry::ParticipantRegistry;
use crate::retry::RetryPolicy;
use crate::transport::{LocalTransport, MessageHandler};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tpc_protocol::{Data, Message, MessageType, Outcome};
use tpc_txlog::{MemoryLog, Phase};

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        phase_timeout: Duration::from_millis(500),
        ack_timeout: Duration::from_millis(200),
        max_redeliveries: 2,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        ..RetryPolicy::default()
    }
}

pub fn payload() -> Data {
    let mut data = Data::new();
    data.insert("account".into(), json!("alice"));
    data.insert("amount".into(), json!(100));
    data
}

/// Drops DoCommit messages while `dropping` is set
pub struct DropDecisions {
    pub inner: Arc<Participant>,
    pub dropping: AtomicBool,
}

impl DropDecisions {
    pub fn new(inner: Arc<Participant>) -> Self {
        Self {
            inner,
            dropping: AtomicBool::new(true),
        }
    }

    pub fn stop(&self) {
        self.dropping.store(false, Ordering::SeqCst);
    }
}

impl MessageHandler for DropDecisions {
    fn handle(&self, msg: Message) -> Option<Message> {
        if self.dropping.load(Ordering::SeqCst) && msg.msg_type == MessageType::DoCommit {
            return None;
        }
        self.inner.handle(msg)
    }
}

pub struct Cluster {
    pub coordinator: Arc<Coordinator>,
    pub coordinator_log: Arc<MemoryLog>,
    pub participants: Vec<Arc<Participant>>,
    pub logs: Vec<Arc<MemoryLog>>,
    pub transport: Arc<LocalTransport>,
}

impl Cluster {
    pub fn new(size: usize) -> Self {
        Self::with_log(size, Arc::new(MemoryLog::new()))
    }

    pub fn with_log(size: usize, coordinator_log: Arc<MemoryLog>) -> Self {
        let transport = Arc::new(LocalTransport::new());
        let registry = Arc::new(ParticipantRegistry::new());
        let mut participants = Vec::new();
        let mut logs = Vec::new();

        for i in 1..=size {
            let id = format!("P{}", i);
            let log = Arc::new(MemoryLog::new());
            let participant = Arc::new(Participant::new(&id, log.clone()).with_policy(fast_policy()));
            transport.attach(&id, participant.clone());
            registry.register(&id, "local");
            participants.push(participant);
            logs.push(log);
        }

        let coordinator = Coordinator::new(
            "C",
            coordinator_log.clone(),
            registry,
            transport.clone(),
            fast_policy(),
        );

        Self {
            coordinator,
            coordinator_log,
            participants,
            logs,
            transport,
        }
    }

    pub fn participant(&self, id: &str) -> &Arc<Participant> {
        self.participants
            .iter()
            .find(|p| p.id() == id)
            .expect("unknown participant")
    }

    pub async fn outcome(&self, id: &str) -> Outcome {
        tokio::time::timeout(Duration::from_secs(5), self.coordinator.wait_for_outcome(id))
            .await
            .expect("no outcome in time")
            .expect("transaction vanished")
    }

    /// Wait until every participant acknowledged the decision
    pub async fn settle(&self, id: &str) {
        eventually(|| {
            self.coordinator
                .transaction(id)
                .map(|t| t.phase == Phase::Finished)
                .unwrap_or(false)
        })
        .await;
    }
}

/// Poll `condition` until it holds, failing after a few seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

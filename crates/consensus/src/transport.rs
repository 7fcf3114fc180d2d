//! Message transport seam
//!
//! The coordinator talks to participants through `Transport`, which hides
//! whether they live in the same process (`LocalTransport`) or behind a
//! WebSocket (`crate::network::WsTransport`).

use crate::error::TransportError;
use crate::registry::ParticipantRecord;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tpc_protocol::Message;

/// Something that answers protocol messages
///
/// Returning `None` means no reply is sent (crashed node, dropped message).
pub trait MessageHandler: Send + Sync {
    fn handle(&self, msg: Message) -> Option<Message>;
}

/// Request/response delivery to a participant
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &ParticipantRecord, msg: Message) -> Result<Message, TransportError>;
}

/// In-process transport with per-participant fault injection
#[derive(Default)]
pub struct LocalTransport {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    unreachable: RwLock<HashSet<String>>,
    delays: RwLock<HashMap<String, Duration>>,
    transaction_delays: RwLock<HashMap<String, Duration>>,
    /// Every message handed to a handler, with its recipient
    sent: Mutex<Vec<(String, Message)>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, id: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.handlers.write().insert(id.into(), handler);
    }

    pub fn set_unreachable(&self, id: &str, unreachable: bool) {
        let mut set = self.unreachable.write();
        if unreachable {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }

    /// Delay every delivery to `id`
    pub fn set_delay(&self, id: &str, delay: Option<Duration>) {
        let mut delays = self.delays.write();
        match delay {
            Some(d) => delays.insert(id.to_string(), d),
            None => delays.remove(id),
        };
    }

    /// Delay every delivery that concerns transaction `txid`
    pub fn set_transaction_delay(&self, txid: &str, delay: Option<Duration>) {
        let mut delays = self.transaction_delays.write();
        match delay {
            Some(d) => delays.insert(txid.to_string(), d),
            None => delays.remove(txid),
        };
    }

    /// Messages delivered to `id`, in order
    pub fn delivered_to(&self, id: &str) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| to == id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, to: &ParticipantRecord, msg: Message) -> Result<Message, TransportError> {
        let delay = self.delays.read().get(&to.id).copied();
        let tx_delay = self.transaction_delays.read().get(&msg.transaction_id).copied();
        if let Some(delay) = delay.into_iter().chain(tx_delay).max() {
            tokio::time::sleep(delay).await;
        }

        if self.unreachable.read().contains(&to.id) {
            return Err(TransportError::Unreachable(to.id.clone()));
        }

        let handler = self
            .handlers
            .read()
            .get(&to.id)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(to.id.clone()))?;

        self.sent.lock().push((to.id.clone(), msg.clone()));
        handler
            .handle(msg)
            .ok_or_else(|| TransportError::NoReply(to.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpc_protocol::MessageType;

    struct Echo;

    impl MessageHandler for Echo {
        fn handle(&self, msg: Message) -> Option<Message> {
            Some(Message::ack_commit(msg.transaction_id))
        }
    }

    #[tokio::test]
    async fn unreachable_participants_get_nothing() {
        let transport = LocalTransport::new();
        transport.attach("P1", Arc::new(Echo));
        let record = ParticipantRecord::new("P1", "local");

        let reply = transport.send(&record, Message::do_commit("t1")).await.unwrap();
        assert_eq!(reply.msg_type, MessageType::AckCommit);

        transport.set_unreachable("P1", true);
        assert!(matches!(
            transport.send(&record, Message::do_commit("t2")).await,
            Err(TransportError::Unreachable(_))
        ));
        assert_eq!(transport.delivered_to("P1").len(), 1);
    }

    #[tokio::test]
    async fn transaction_delay_holds_only_that_transaction() {
        let transport = Arc::new(LocalTransport::new());
        transport.attach("P1", Arc::new(Echo));
        transport.set_transaction_delay("slow", Some(Duration::from_millis(300)));
        let record = ParticipantRecord::new("P1", "local");

        let slow = {
            let transport = transport.clone();
            let record = record.clone();
            tokio::spawn(async move { transport.send(&record, Message::do_commit("slow")).await })
        };
        tokio::task::yield_now().await;

        transport.send(&record, Message::do_commit("fast")).await.unwrap();
        let delivered = transport.delivered_to("P1");
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].transaction_id, "fast");

        slow.await.unwrap().unwrap();
        assert_eq!(transport.delivered_to("P1").len(), 2);
    }
}

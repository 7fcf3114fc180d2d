//! WebSocket plumbing for protocol messages
//!
//! Every node runs a `MessageServer`. Peers connect, send JSON text frames
//! and receive one reply frame per request (or nothing, if the handler drops
//! the message).

use crate::error::TransportError;
use crate::registry::ParticipantRecord;
use crate::termination::{outcome_from_reply, OutcomeSource};
use crate::transport::{MessageHandler, Transport};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message as WsMessage};
use tpc_protocol::{HistoryRecord, Message, MessageType};

/// Accepts protocol connections and answers them with a `MessageHandler`
pub struct MessageServer {
    handler: Arc<dyn MessageHandler>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl MessageServer {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            handler,
            accept_task: Mutex::new(None),
        }
    }

    /// Start listening; returns the bound address
    pub async fn start(&self, addr: &str) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Protocol server listening on {}", local_addr);

        let handler = self.handler.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!("Protocol connection from {}", peer_addr);
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler).await {
                                tracing::warn!("Protocol connection error from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });

        if let Some(previous) = self.accept_task.lock().replace(task) {
            previous.abort();
        }
        Ok(local_addr)
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }
}

async fn handle_connection(stream: TcpStream, handler: Arc<dyn MessageHandler>) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let msg = match Message::from_json(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed frame: {}", e);
                        continue;
                    }
                };
                // Handlers write the durable log, which blocks
                let handler = handler.clone();
                let reply = tokio::task::spawn_blocking(move || handler.handle(msg)).await?;
                if let Some(reply) = reply {
                    ws_sender.send(WsMessage::Text(reply.to_json())).await?;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

fn ws_url(addr: &str) -> String {
    if addr.starts_with("ws://") || addr.starts_with("wss://") {
        addr.to_string()
    } else {
        format!("ws://{}", addr)
    }
}

/// Send one message to `addr` and wait for its reply
pub async fn request(addr: &str, msg: &Message, timeout: Duration) -> Result<Message, TransportError> {
    match tokio::time::timeout(timeout, exchange(addr, msg)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(format!("{} from {}", msg.msg_type, addr))),
    }
}

async fn exchange(addr: &str, msg: &Message) -> Result<Message, TransportError> {
    let (ws_stream, _) = connect_async(ws_url(addr))
        .await
        .map_err(|e| TransportError::Unreachable(format!("{}: {}", addr, e)))?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    ws_sender
        .send(WsMessage::Text(msg.to_json()))
        .await
        .map_err(|e| TransportError::Closed(format!("{}: {}", addr, e)))?;

    let reply = loop {
        match ws_receiver.next().await {
            Some(Ok(WsMessage::Text(text))) => break Message::from_json(&text)?,
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(TransportError::Closed(addr.to_string()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::Closed(format!("{}: {}", addr, e))),
        }
    };

    let _ = ws_sender.send(WsMessage::Close(None)).await;
    Ok(reply)
}

/// Transport that reaches participants at their registered WebSocket address
pub struct WsTransport {
    timeout: Duration,
}

impl WsTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, to: &ParticipantRecord, msg: Message) -> Result<Message, TransportError> {
        request(&to.address, &msg, self.timeout).await
    }
}

/// A participant's connection to its coordinator
pub struct CoordinatorClient {
    participant_id: String,
    /// Address the participant's own server listens on
    listen_addr: String,
    coordinator_addr: String,
    timeout: Duration,
}

impl CoordinatorClient {
    pub fn new(
        participant_id: impl Into<String>,
        listen_addr: impl Into<String>,
        coordinator_addr: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            listen_addr: listen_addr.into(),
            coordinator_addr: coordinator_addr.into(),
            timeout,
        }
    }

    /// Announce this participant's address to the coordinator
    pub async fn register(&self) -> Result<(), TransportError> {
        let msg = Message::register(&self.participant_id, &self.listen_addr);
        let reply = request(&self.coordinator_addr, &msg, self.timeout).await?;
        if reply.msg_type != MessageType::Registered {
            return Err(TransportError::NoReply(format!(
                "{} answered REGISTER with {}",
                self.coordinator_addr, reply.msg_type
            )));
        }
        tracing::info!(
            "Registered {} at coordinator {}",
            self.participant_id,
            self.coordinator_addr
        );
        Ok(())
    }

    /// Fetch every decided transaction from the coordinator
    pub async fn request_history(&self) -> Result<Vec<HistoryRecord>, TransportError> {
        let msg = Message::request_history(&self.participant_id);
        let reply = request(&self.coordinator_addr, &msg, self.timeout).await?;
        Ok(reply.history()?)
    }
}

#[async_trait]
impl OutcomeSource for CoordinatorClient {
    fn name(&self) -> String {
        format!("coordinator at {}", self.coordinator_addr)
    }

    async fn outcome(&self, transaction_id: &str) -> Result<tpc_protocol::Outcome, TransportError> {
        let reply = request(
            &self.coordinator_addr,
            &Message::query_state(transaction_id),
            self.timeout,
        )
        .await?;
        outcome_from_reply(&reply)
    }
}

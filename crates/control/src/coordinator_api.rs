//! Coordinator control endpoints

use crate::error::{ControlError, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tpc_consensus::{Coordinator, CoordinatorStats, ParticipantRecord, TransactionSnapshot};
use tpc_protocol::{Data, HistoryRecord};

#[derive(Debug, Deserialize)]
pub struct StartTransactionRequest {
    #[serde(default)]
    pub payload: Data,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartTransactionResponse {
    pub transaction_id: String,
}

pub fn routes(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/participants", get(participants))
        .route("/transactions", get(transactions).post(start_transaction))
        .route("/transactions/:id", get(transaction))
        .route("/history", get(history))
        .route("/stats", get(stats))
        .route("/crash", post(crash))
        .route("/recover", post(recover))
        .with_state(coordinator)
}

async fn health(State(coordinator): State<Arc<Coordinator>>) -> Json<Value> {
    Json(json!({
        "status": if coordinator.is_crashed() { "crashed" } else { "ok" },
        "role": "coordinator",
        "id": coordinator.id(),
    }))
}

async fn participants(State(coordinator): State<Arc<Coordinator>>) -> Json<Vec<ParticipantRecord>> {
    Json(coordinator.participants())
}

async fn start_transaction(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<StartTransactionRequest>,
) -> Result<(StatusCode, Json<StartTransactionResponse>)> {
    let transaction_id = match request.transaction_id {
        Some(id) if id.trim().is_empty() => {
            return Err(ControlError::InvalidRequest("empty transaction_id".into()))
        }
        Some(id) => coordinator.start_transaction_with_id(&id, request.payload)?,
        None => coordinator.start_transaction(request.payload)?,
    };
    tracing::info!("Transaction {} submitted over HTTP", transaction_id);
    Ok((StatusCode::ACCEPTED, Json(StartTransactionResponse { transaction_id })))
}

async fn transactions(State(coordinator): State<Arc<Coordinator>>) -> Json<Vec<TransactionSnapshot>> {
    Json(coordinator.transactions())
}

async fn transaction(
    State(coordinator): State<Arc<Coordinator>>,
    Path(id): Path<String>,
) -> Result<Json<TransactionSnapshot>> {
    if coordinator.is_crashed() {
        return Err(ControlError::Unavailable("coordinator is crashed".into()));
    }
    coordinator
        .transaction(&id)
        .map(Json)
        .ok_or(ControlError::NotFound(id))
}

async fn history(State(coordinator): State<Arc<Coordinator>>) -> Json<Vec<HistoryRecord>> {
    Json(coordinator.list_history())
}

async fn stats(State(coordinator): State<Arc<Coordinator>>) -> Json<CoordinatorStats> {
    Json(coordinator.stats())
}

async fn crash(State(coordinator): State<Arc<Coordinator>>) -> Json<Value> {
    coordinator.crash();
    Json(json!({ "crashed": true }))
}

async fn recover(State(coordinator): State<Arc<Coordinator>>) -> Result<Json<Value>> {
    let resumed = coordinator.recover()?;
    Ok(Json(json!({ "crashed": false, "resumed": resumed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;
    use tpc_consensus::{LocalTransport, Participant, ParticipantRegistry, RetryPolicy};
    use tpc_protocol::Outcome;
    use tpc_txlog::MemoryLog;

    fn coordinator() -> Arc<Coordinator> {
        let transport = Arc::new(LocalTransport::new());
        let registry = Arc::new(ParticipantRegistry::new());
        for id in ["P1", "P2"] {
            transport.attach(id, Arc::new(Participant::new(id, Arc::new(MemoryLog::new()))));
            registry.register(id, "local");
        }
        Coordinator::new(
            "C",
            Arc::new(MemoryLog::new()),
            registry,
            transport,
            RetryPolicy::default(),
        )
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn submit_and_inspect_transaction() {
        let coordinator = coordinator();
        let app = routes(coordinator.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/transactions",
                json!({ "transaction_id": "tx-1", "payload": { "key": "value" } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["transaction_id"], "tx-1");

        assert_eq!(coordinator.wait_for_outcome("tx-1").await.unwrap(), Outcome::Committed);

        let response = app.clone().oneshot(get("/transactions/tx-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["outcome"], "committed");

        let response = app.clone().oneshot(get("/history")).await.unwrap();
        let history = body_json(response).await;
        assert_eq!(history[0]["transaction_id"], "tx-1");

        let response = app.oneshot(get("/participants")).await.unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_and_unknown_ids() {
        let app = routes(coordinator());
        let request = json!({ "transaction_id": "dup", "payload": { "k": 1 } });

        let first = app.clone().oneshot(post_json("/transactions", request.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let second = app.clone().oneshot(post_json("/transactions", request)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let missing = app.oneshot(get("/transactions/nope")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn crashed_coordinator_is_unavailable() {
        let app = routes(coordinator());

        let response = app.clone().oneshot(post_json("/crash", json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(post_json("/transactions", json!({ "payload": { "k": 1 } })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app.clone().oneshot(post_json("/recover", json!({}))).await.unwrap();
        assert_eq!(body_json(response).await["crashed"], false);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn nested_payload_is_a_bad_request() {
        let coordinator = coordinator();
        let app = routes(coordinator.clone());

        let response = app
            .oneshot(post_json(
                "/transactions",
                json!({ "transaction_id": "tx-n", "payload": { "items": [1, 2] } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("items"));
        assert!(coordinator.transaction("tx-n").is_none());
    }
}

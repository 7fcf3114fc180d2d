//! Participant control endpoints

use crate::error::Result;
use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tpc_consensus::{CoordinatorClient, FaultConfig, Participant, ParticipantStatus};
use tpc_protocol::{Data, Vote, VotePhase};

/// State shared by the participant handlers
#[derive(Clone)]
pub struct ParticipantContext {
    pub participant: Arc<Participant>,
    /// Used on recovery to re-register and catch up on decided history
    pub coordinator: Option<Arc<CoordinatorClient>>,
}

pub fn routes(context: ParticipantContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/data", get(data))
        .route("/fault", get(fault).put(set_fault))
        .route("/votes/:id", put(set_vote))
        .route("/crash", post(crash))
        .route("/recover", post(recover))
        .with_state(context)
}

async fn health(State(ctx): State<ParticipantContext>) -> Json<Value> {
    Json(json!({
        "status": if ctx.participant.is_crashed() { "crashed" } else { "ok" },
        "role": "participant",
        "id": ctx.participant.id(),
    }))
}

async fn status(State(ctx): State<ParticipantContext>) -> Json<ParticipantStatus> {
    Json(ctx.participant.status())
}

async fn data(State(ctx): State<ParticipantContext>) -> Json<BTreeMap<String, Data>> {
    Json(ctx.participant.committed_data())
}

async fn fault(State(ctx): State<ParticipantContext>) -> Json<FaultConfig> {
    Json(ctx.participant.faults())
}

async fn set_fault(
    State(ctx): State<ParticipantContext>,
    Json(faults): Json<FaultConfig>,
) -> Json<FaultConfig> {
    tracing::info!(
        "Participant {} faults set: forced vote {:?}, failure rate {}",
        ctx.participant.id(),
        faults.forced_vote,
        faults.failure_rate
    );
    ctx.participant.set_faults(faults);
    Json(ctx.participant.faults())
}

/// Pin (or with `vote: null`, unpin) this participant's vote for one transaction
#[derive(Debug, Deserialize)]
struct ManualVoteRequest {
    phase: VotePhase,
    vote: Option<Vote>,
}

async fn set_vote(
    State(ctx): State<ParticipantContext>,
    Path(id): Path<String>,
    Json(request): Json<ManualVoteRequest>,
) -> Json<FaultConfig> {
    tracing::info!(
        "Participant {} {} vote for {} pinned to {:?}",
        ctx.participant.id(),
        request.phase,
        id,
        request.vote
    );
    ctx.participant.set_manual_vote(&id, request.phase, request.vote);
    Json(ctx.participant.faults())
}

async fn crash(State(ctx): State<ParticipantContext>) -> Json<Value> {
    ctx.participant.crash();
    Json(json!({ "crashed": true }))
}

async fn recover(State(ctx): State<ParticipantContext>) -> Result<Json<Value>> {
    let in_doubt = ctx.participant.recover()?;

    let mut converged = 0;
    if let Some(client) = &ctx.coordinator {
        if let Err(e) = client.register().await {
            tracing::warn!("Re-registration failed: {}", e);
        }
        match client.request_history().await {
            Ok(history) => converged = ctx.participant.apply_history(&history),
            Err(e) => tracing::warn!("History request failed: {}", e),
        }
    }

    Ok(Json(json!({
        "crashed": false,
        "in_doubt": in_doubt,
        "converged": converged,
    })))
}

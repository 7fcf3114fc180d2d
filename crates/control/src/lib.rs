//! Control Server - HTTP surface for operating 3PC nodes
//!
//! Coordinator: submit transactions, inspect outcomes and history, list participants.
//! Participant: inspect state and applied data, inject faults.
//! Both: simulate a crash and recover from the log.

pub mod coordinator_api;
pub mod error;
pub mod participant_api;

pub use error::ControlError;
pub use participant_api::ParticipantContext;

use axum::{
    http::{header, Method},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tpc_consensus::Coordinator;

/// HTTP control server
pub struct ControlServer {
    router: Router,
}

impl ControlServer {
    pub fn coordinator(coordinator: Arc<Coordinator>) -> Self {
        Self {
            router: coordinator_api::routes(coordinator),
        }
    }

    pub fn participant(context: ParticipantContext) -> Self {
        Self {
            router: participant_api::routes(context),
        }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // CORS layer to allow browser dashboards
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        self.router.layer(cors)
    }

    /// Run the server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP control server listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

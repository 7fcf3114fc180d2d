//! Control surface errors and their HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tpc_consensus::{CoordinatorError, ParticipantError};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlError {
    fn status(&self) -> StatusCode {
        match self {
            ControlError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::Conflict(_) => StatusCode::CONFLICT,
            ControlError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Control request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<CoordinatorError> for ControlError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::DuplicateTransaction(_) => ControlError::Conflict(e.to_string()),
            CoordinatorError::TransactionNotFound(_) => ControlError::NotFound(e.to_string()),
            CoordinatorError::InvalidPayload(_) => ControlError::InvalidRequest(e.to_string()),
            CoordinatorError::Crashed => ControlError::Unavailable(e.to_string()),
            CoordinatorError::Log(_) => ControlError::Internal(e.to_string()),
        }
    }
}

impl From<ParticipantError> for ControlError {
    fn from(e: ParticipantError) -> Self {
        match e {
            ParticipantError::Crashed(_) => ControlError::Unavailable(e.to_string()),
            _ => ControlError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;

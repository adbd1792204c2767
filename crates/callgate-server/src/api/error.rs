//! HTTP error mapping

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use callgate_core::GatewayError;

/// Errors returned by the call-control handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body was not valid JSON for the endpoint
    #[error("Invalid request")]
    InvalidRequest(#[from] JsonRejection),

    #[error("Error generating offer: {0}")]
    Offer(GatewayError),

    #[error("Error generating answer: {0}")]
    Answer(GatewayError),

    #[error("Error processing action: {0}")]
    Action(GatewayError),
}

impl ApiError {
    fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            ApiError::InvalidRequest(_) => None,
            ApiError::Offer(e) | ApiError::Answer(e) | ApiError::Action(e) => Some(e),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.gateway_error() {
            None => StatusCode::BAD_REQUEST,
            Some(GatewayError::Validation { .. }) => StatusCode::BAD_REQUEST,
            Some(GatewayError::DuplicateCall { .. }) => StatusCode::CONFLICT,
            Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client errors carry the bare gateway message, server errors the
    /// operation prefix
    fn message(&self) -> String {
        match self.gateway_error() {
            Some(e) if e.is_client_error() => e.to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::InvalidRequest(rejection) = &self {
            debug!("Rejected request body: {}", rejection.body_text());
        } else if status.is_server_error() {
            error!("{}", self);
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

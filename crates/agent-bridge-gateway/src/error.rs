//! Error types for the gateway.

use agent_bridge_core::BridgeError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Request failure.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Body missing a field, or not JSON at all.
    #[error("Missing conversationId or message")]
    MissingField,

    /// The exchange with the agent failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl GatewayError {
    /// HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingField => StatusCode::BAD_REQUEST,
            Self::Bridge(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::MissingField => ErrorResponse {
                error: self.to_string(),
                details: None,
            },
            Self::Bridge(e) => {
                error!("Error in send-message: {e}");
                ErrorResponse {
                    error: "Internal server error".to_string(),
                    details: Some(e.to_string()),
                }
            }
        };
        (self.status_code(), Json(body)).into_response()
    }
}

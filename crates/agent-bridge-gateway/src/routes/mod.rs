//! HTTP routes.

pub mod health;
pub mod messages;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Route table without middleware.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/send-message", post(messages::send_message))
        .route("/health", get(health::health_check))
}

//! Shared application state.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use agent_bridge_session::Bridge;

/// State shared across handlers.
pub struct AppState {
    pub bridge: Arc<Bridge>,
    started_at: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self {
            bridge,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

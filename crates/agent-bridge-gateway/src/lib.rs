//! HTTP gateway exposing agent conversations as request/response calls.
//!
//! `POST /send-message` forwards one user message into a conversation and
//! answers with the agent's reply once its turn is over.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use agent_bridge_session::Bridge;
use agent_bridge_transport::SocketIoConnector;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub use config::{ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use state::AppState;

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until ctrl-c or SIGTERM.
///
/// In-flight exchanges are cancelled on shutdown and answered with a 500.
///
/// # Errors
/// Returns error if the listener cannot be bound or the server fails.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let connector = Arc::new(SocketIoConnector::new(config.socket_io_options()));
    let bridge = Arc::new(Bridge::new(connector, config.bridge_options()));
    let state = Arc::new(AppState::new(Arc::clone(&bridge)));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        remote_url = %config.remote_url,
        "Server listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            bridge.shutdown();
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutdown signal received");
}

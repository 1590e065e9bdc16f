//! `agent-bridge` HTTP gateway.
//!
//! Run with: agent-bridge --token <TOKEN> --remote-url ws://host:3000

use std::process::ExitCode;

use agent_bridge_gateway::GatewayConfig;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env is fine.
    let _ = dotenvy::dotenv();
    let config = GatewayConfig::parse();

    setup_logging(&config.log_level, config.json_logs);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    match agent_bridge_gateway::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

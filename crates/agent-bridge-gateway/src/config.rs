//! Gateway configuration from CLI flags and environment.

use std::{fmt, time::Duration};

use agent_bridge_core::{ConversationId, TransportError};
use agent_bridge_session::BridgeOptions;
use agent_bridge_transport::{SocketIoOptions, endpoint::socket_url};
use clap::Parser;
use secrecy::SecretString;
use thiserror::Error;

/// Longest accepted completion timeout.
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Listen host must not be empty")]
    EmptyHost,
    #[error("Port must be non-zero")]
    InvalidPort,
    #[error("Timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds, got {0}")]
    InvalidTimeout(u64),
    #[error("Invalid remote URL: {0}")]
    InvalidRemoteUrl(String),
    #[error("Token must not be empty")]
    MissingToken,
}

/// Agent bridge HTTP gateway.
#[derive(Parser, Clone)]
#[command(name = "agent-bridge", version, about, long_about = None)]
pub struct GatewayConfig {
    /// Host to listen on.
    #[arg(long, env = "AGENT_BRIDGE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address of the agent server.
    #[arg(long, env = "AGENT_BRIDGE_REMOTE_URL", default_value = "ws://127.0.0.1:3000")]
    pub remote_url: String,

    /// Bearer token sent when joining a conversation.
    #[arg(long, env = "AGENT_BRIDGE_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Seconds to wait for the agent to finish its turn.
    #[arg(long, env = "AGENT_BRIDGE_TIMEOUT_SECS", default_value_t = 120)]
    pub timeout_secs: u64,

    /// Seconds to wait for the delivery acknowledgment.
    #[arg(long, env = "AGENT_BRIDGE_ACK_TIMEOUT_SECS", default_value_t = 10)]
    pub ack_timeout_secs: u64,

    /// Event id to replay from on connect (-1 replays everything).
    #[arg(
        long,
        env = "AGENT_BRIDGE_REPLAY_CURSOR",
        default_value_t = -1,
        allow_hyphen_values = true
    )]
    pub replay_cursor: i64,

    /// Source tag announced on connect.
    #[arg(long, env = "AGENT_BRIDGE_SOURCE_TAG", default_value = "external_client")]
    pub source_tag: String,

    /// Reconnect attempts before a session gives up.
    #[arg(long, env = "AGENT_BRIDGE_RECONNECT_ATTEMPTS", default_value_t = 5)]
    pub reconnect_attempts: u32,

    /// Fail an exchange on the first connect error.
    #[arg(long, env = "AGENT_BRIDGE_FAIL_FAST")]
    pub fail_fast: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON.
    #[arg(long, env = "AGENT_BRIDGE_JSON_LOGS")]
    pub json_logs: bool,
}

impl GatewayConfig {
    /// Check values clap cannot.
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }

        let probe = self
            .bridge_options()
            .session_params(ConversationId::new("probe"));
        socket_url(&probe).map_err(|e| match e {
            TransportError::InvalidUrl(reason) => ConfigError::InvalidRemoteUrl(reason),
            other => ConfigError::InvalidRemoteUrl(other.to_string()),
        })?;

        Ok(())
    }

    #[must_use]
    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions::new(&self.remote_url, SecretString::from(self.token.clone()))
            .with_completion_timeout(Duration::from_secs(self.timeout_secs))
            .with_ack_timeout(Duration::from_secs(self.ack_timeout_secs))
            .with_replay_cursor(self.replay_cursor)
            .with_source_tag(&self.source_tag)
            .with_fail_fast(self.fail_fast)
    }

    #[must_use]
    pub fn socket_io_options(&self) -> SocketIoOptions {
        SocketIoOptions {
            reconnect_attempts: self.reconnect_attempts,
            ..SocketIoOptions::default()
        }
    }

    /// Listen address as `host:port`.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("remote_url", &self.remote_url)
            .field("token", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .field("ack_timeout_secs", &self.ack_timeout_secs)
            .field("replay_cursor", &self.replay_cursor)
            .field("source_tag", &self.source_tag)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("fail_fast", &self.fail_fast)
            .field("log_level", &self.log_level)
            .field("json_logs", &self.json_logs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> GatewayConfig {
        let mut argv = vec!["agent-bridge"];
        argv.extend_from_slice(args);
        GatewayConfig::try_parse_from(argv).unwrap()
    }

    fn valid() -> GatewayConfig {
        parse(&[
            "--token",
            "secret",
            "--port",
            "3000",
            "--host",
            "0.0.0.0",
            "--remote-url",
            "ws://127.0.0.1:3000",
            "--timeout-secs",
            "120",
        ])
    }

    #[test]
    fn test_valid_config() {
        let config = valid();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_negative_replay_cursor_parses() {
        let config = parse(&["--token", "secret", "--replay-cursor", "-1"]);
        assert_eq!(config.replay_cursor, -1);
        let config = parse(&["--token", "secret", "--replay-cursor", "250"]);
        assert_eq!(config.bridge_options().replay_cursor, 250);
    }

    #[test]
    fn test_rejects_zero_port() {
        let config = GatewayConfig { port: 0, ..valid() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        let config = GatewayConfig { timeout_secs: 0, ..valid() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeout(0)));

        let config = GatewayConfig { timeout_secs: 3601, ..valid() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeout(3601)));
    }

    #[test]
    fn test_rejects_empty_token() {
        let config = GatewayConfig { token: "  ".to_string(), ..valid() };
        assert_eq!(config.validate(), Err(ConfigError::MissingToken));
    }

    #[test]
    fn test_rejects_bad_remote_url() {
        let config = GatewayConfig {
            remote_url: "ftp://example.com".to_string(),
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRemoteUrl(_))
        ));
    }

    #[test]
    fn test_options_carry_settings() {
        let config = GatewayConfig {
            timeout_secs: 30,
            fail_fast: true,
            reconnect_attempts: 2,
            ..valid()
        };
        let options = config.bridge_options();
        assert_eq!(options.completion_timeout, Duration::from_secs(30));
        assert!(options.fail_fast);
        assert_eq!(config.socket_io_options().reconnect_attempts, 2);
    }

    #[test]
    fn test_debug_redacts_token() {
        assert!(!format!("{:?}", valid()).contains("secret"));
    }

    #[test]
    fn test_ipv6_listen_addr() {
        let config = GatewayConfig { host: "::".to_string(), ..valid() };
        assert_eq!(config.listen_addr(), "[::]:3000");
    }
}

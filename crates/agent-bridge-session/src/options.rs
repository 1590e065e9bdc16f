//! Bridge-wide settings applied to every conversation.

use std::{fmt, sync::Arc, time::Duration};

use agent_bridge_core::{
    ConversationId, SessionParams,
    params::{DEFAULT_SOURCE_TAG, REPLAY_FROM_START},
};
use secrecy::SecretString;

/// How long an exchange waits for the agent to finish its turn.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

/// How long the delivery acknowledgment is waited for before logging a warning.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by all exchanges of a `Bridge`.
#[derive(Clone)]
pub struct BridgeOptions {
    /// Remote address of the agent server.
    pub remote_url: String,
    /// Bearer credential sent on connect.
    pub token: Arc<SecretString>,
    /// Event position to replay from on connect.
    pub replay_cursor: i64,
    /// Client source tag sent on connect.
    pub source_tag: String,
    /// Upper bound on one exchange.
    pub completion_timeout: Duration,
    /// Upper bound on waiting for the delivery acknowledgment.
    pub ack_timeout: Duration,
    /// Fail the exchange on the first connect error instead of waiting for reconnects.
    pub fail_fast: bool,
}

impl BridgeOptions {
    #[must_use]
    pub fn new(remote_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            remote_url: remote_url.into(),
            token: Arc::new(token),
            replay_cursor: REPLAY_FROM_START,
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            fail_fast: false,
        }
    }

    #[must_use]
    pub const fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_replay_cursor(mut self, cursor: i64) -> Self {
        self.replay_cursor = cursor;
        self
    }

    #[must_use]
    pub fn with_source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = tag.into();
        self
    }

    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Connect parameters for one conversation.
    #[must_use]
    pub fn session_params(&self, conversation_id: ConversationId) -> SessionParams {
        SessionParams::new(&self.remote_url, conversation_id, Arc::clone(&self.token))
            .with_replay_cursor(self.replay_cursor)
            .with_source_tag(&self.source_tag)
    }
}

impl fmt::Debug for BridgeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeOptions")
            .field("remote_url", &self.remote_url)
            .field("token", &"[REDACTED]")
            .field("replay_cursor", &self.replay_cursor)
            .field("source_tag", &self.source_tag)
            .field("completion_timeout", &self.completion_timeout)
            .field("ack_timeout", &self.ack_timeout)
            .field("fail_fast", &self.fail_fast)
            .finish()
    }
}

//! Session connect parameters.

use std::sync::Arc;

use secrecy::SecretString;

use crate::ConversationId;

/// Replay cursor meaning "since the beginning of the conversation".
pub const REPLAY_FROM_START: i64 = -1;

/// Default client source tag sent on connect.
pub const DEFAULT_SOURCE_TAG: &str = "external_client";

/// Parameters for opening one transport session.
#[derive(Clone)]
pub struct SessionParams {
    /// Remote address (`ws://`, `wss://`, `http(s)://` or bare `host:port`).
    pub remote_url: String,
    /// Conversation the session is scoped to.
    pub conversation_id: ConversationId,
    /// Event position to replay from.
    pub replay_cursor: i64,
    /// Client source tag.
    pub source_tag: String,
    /// Bearer credential.
    pub token: Arc<SecretString>,
}

impl SessionParams {
    /// Create params replaying from the start with the default source tag.
    #[must_use]
    pub fn new(
        remote_url: impl Into<String>,
        conversation_id: ConversationId,
        token: Arc<SecretString>,
    ) -> Self {
        Self {
            remote_url: remote_url.into(),
            conversation_id,
            replay_cursor: REPLAY_FROM_START,
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            token,
        }
    }

    /// Override the replay cursor.
    #[must_use]
    pub const fn with_replay_cursor(mut self, cursor: i64) -> Self {
        self.replay_cursor = cursor;
        self
    }

    /// Override the source tag.
    #[must_use]
    pub fn with_source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = tag.into();
        self
    }

    /// Query parameters sent on connect.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("conversation_id", self.conversation_id.to_string()),
            ("latest_event_id", self.replay_cursor.to_string()),
            ("source", self.source_tag.clone()),
        ]
    }
}

impl std::fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionParams")
            .field("remote_url", &self.remote_url)
            .field("conversation_id", &self.conversation_id)
            .field("replay_cursor", &self.replay_cursor)
            .field("source_tag", &self.source_tag)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

//! Values exchanged with the remote agent.
//!
//! Event names and payload shapes are part of the remote contract; changing
//! them is a breaking protocol change.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name used for outbound actions.
pub const ACTION_EVENT: &str = "oh_action";

/// Event name carrying inbound agent events.
pub const EVENT_NAME: &str = "oh_event";

/// Origin tag of events produced by the remote agent.
pub const SOURCE_AGENT: &str = "agent";

/// Origin tag of actions submitted on behalf of the caller.
pub const SOURCE_USER: &str = "user";

/// Agent state marking the end of the agent's turn.
pub const AWAITING_USER_INPUT: &str = "awaiting_user_input";

/// Ack status the remote sends once an action is accepted.
pub const ACK_RECEIVED: &str = "received";

/// Opaque identifier of a remote conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Create a conversation id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Arguments attached to a message action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionArgs {
    /// Message content, repeated from the action.
    pub content: String,
    /// Ask the remote side to wait for the agent's reply before advancing.
    pub wait_for_response: bool,
}

/// Action submitted to the remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundAction {
    /// Origin tag, always `user`.
    pub source: String,
    /// Action kind, always `message`.
    pub action: String,
    /// Literal message text.
    pub message: String,
    /// Argument bag.
    pub args: ActionArgs,
}

impl OutboundAction {
    /// Build a user message action.
    #[must_use]
    pub fn user_message(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            source: SOURCE_USER.to_string(),
            action: "message".to_string(),
            message: text.clone(),
            args: ActionArgs {
                content: text,
                wait_for_response: true,
            },
        }
    }
}

/// Event received from the remote agent.
///
/// The shape is open; only a handful of fields are inspected. The raw JSON is
/// preserved and handed back to callers verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundEvent(Value);

impl InboundEvent {
    /// Wrap a raw JSON event.
    #[must_use]
    pub const fn new(raw: Value) -> Self {
        Self(raw)
    }

    /// Origin tag (`source`).
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.0.get("source").and_then(Value::as_str)
    }

    /// Whether the event originates from the agent.
    #[must_use]
    pub fn is_from_agent(&self) -> bool {
        self.source() == Some(SOURCE_AGENT)
    }

    /// Whether `message` holds a truthy value.
    ///
    /// Non-empty strings, non-zero numbers, `true`, objects and arrays all
    /// count; `null`, `false`, `0` and `""` do not.
    #[must_use]
    pub fn has_message(&self) -> bool {
        match self.0.get("message") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(text)) => !text.is_empty(),
            Some(Value::Array(_) | Value::Object(_)) => true,
        }
    }

    /// Message text, if it is a non-empty string.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.0
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
    }

    /// Agent state marker from `extras.agent_state`.
    #[must_use]
    pub fn agent_state(&self) -> Option<&str> {
        self.0
            .get("extras")
            .and_then(|extras| extras.get("agent_state"))
            .and_then(Value::as_str)
    }

    /// Numeric event id, when the remote assigns one.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.0.get("id").and_then(Value::as_i64)
    }

    /// Borrow the raw JSON.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the raw JSON.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Acknowledgment payload returned for an emitted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack(Value);

impl Ack {
    /// Wrap a raw ack payload.
    #[must_use]
    pub const fn new(raw: Value) -> Self {
        Self(raw)
    }

    /// The `status` field, if any.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.0.get("status").and_then(Value::as_str)
    }

    /// Whether the remote confirmed delivery.
    #[must_use]
    pub fn is_received(&self) -> bool {
        self.status() == Some(ACK_RECEIVED)
    }

    /// Borrow the raw payload.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }
}

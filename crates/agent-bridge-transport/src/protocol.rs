//! Engine.IO v4 and Socket.IO v5 text packet codec.
//!
//! Only text frames on the root namespace are spoken; binary packets are
//! rejected.

use agent_bridge_core::TransportError;
use serde::Deserialize;
use serde_json::Value;

/// Packet decode error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty packet")]
    Empty,
    #[error("Unknown packet type: {0}")]
    UnknownType(char),
    #[error("Unsupported packet type: {0}")]
    Unsupported(char),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Packet for namespace {0}")]
    OtherNamespace(String),
}

impl From<DecodeError> for TransportError {
    fn from(e: DecodeError) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// Engine.IO open handshake.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine session id.
    pub sid: String,
    /// Available transport upgrades.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Server ping interval in milliseconds.
    pub ping_interval: u64,
    /// Grace period for a ping in milliseconds.
    pub ping_timeout: u64,
    /// Maximum payload size in bytes.
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    /// `0` open handshake.
    Open(OpenHandshake),
    /// `1` close.
    Close,
    /// `2` ping with optional probe data.
    Ping(String),
    /// `3` pong echoing the ping data.
    Pong(String),
    /// `4` message carrying a Socket.IO packet.
    Message(String),
    /// `5` upgrade.
    Upgrade,
    /// `6` noop.
    Noop,
}

impl EnginePacket {
    /// Decode a text frame.
    ///
    /// # Errors
    /// Returns error if the frame is empty or malformed.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(DecodeError::Empty)?;
        let body = chars.as_str();

        match kind {
            '0' => serde_json::from_str(body)
                .map(Self::Open)
                .map_err(|e| DecodeError::InvalidPayload(e.to_string())),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(body.to_string())),
            '3' => Ok(Self::Pong(body.to_string())),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            'b' => Err(DecodeError::Unsupported(kind)),
            other => Err(DecodeError::UnknownType(other)),
        }
    }

    /// Encode as a text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(_) => "0".to_string(),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(payload) => format!("4{payload}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet on the root namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketPacket {
    /// `0` namespace connect, with the auth payload (client) or sid (server).
    Connect(Option<Value>),
    /// `1` namespace disconnect.
    Disconnect,
    /// `2` event, optionally requesting an ack.
    Event {
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    /// `3` ack for an earlier event.
    Ack { id: u64, args: Vec<Value> },
    /// `4` namespace connect refused.
    ConnectError(Value),
}

impl SocketPacket {
    /// Build an event packet.
    #[must_use]
    pub fn event(name: impl Into<String>, payload: Value, id: Option<u64>) -> Self {
        Self::Event {
            id,
            name: name.into(),
            args: vec![payload],
        }
    }

    /// Decode the payload of an Engine.IO message.
    ///
    /// A `/` namespace prefix is accepted and skipped.
    ///
    /// # Errors
    /// Returns error if the packet is malformed, binary, or addressed to
    /// another namespace.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let mut chars = payload.chars();
        let kind = chars.next().ok_or(DecodeError::Empty)?;
        let rest = root_namespace_body(chars.as_str())?;
        let (id, body) = split_ack_id(rest);

        match kind {
            '0' => Ok(Self::Connect(parse_optional(body)?)),
            '1' => Ok(Self::Disconnect),
            '2' => {
                let mut items = parse_array(body)?.into_iter();
                let name = match items.next() {
                    Some(Value::String(name)) => name,
                    _ => {
                        return Err(DecodeError::InvalidPayload(
                            "event name missing".to_string(),
                        ));
                    }
                };
                Ok(Self::Event {
                    id,
                    name,
                    args: items.collect(),
                })
            }
            '3' => {
                let id = id
                    .ok_or_else(|| DecodeError::InvalidPayload("ack id missing".to_string()))?;
                Ok(Self::Ack {
                    id,
                    args: parse_array(body)?,
                })
            }
            '4' => Ok(Self::ConnectError(
                parse_optional(body)?.unwrap_or(Value::Null),
            )),
            '5' | '6' => Err(DecodeError::Unsupported(kind)),
            other => Err(DecodeError::UnknownType(other)),
        }
    }

    /// Encode as an Engine.IO message payload (without the `4` prefix).
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Connect(Some(auth)) => format!("0{auth}"),
            Self::Connect(None) => "0".to_string(),
            Self::Disconnect => "1".to_string(),
            Self::Event { id, name, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                let id = id.map(|id| id.to_string()).unwrap_or_default();
                format!("2{id}{}", Value::Array(items))
            }
            Self::Ack { id, args } => format!("3{id}{}", Value::Array(args.clone())),
            Self::ConnectError(data) => format!("4{data}"),
        }
    }

    /// Wrap in an Engine.IO message frame.
    #[must_use]
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }

    /// Human-readable reason carried by a connect error.
    #[must_use]
    pub fn error_message(data: &Value) -> String {
        data.get("message")
            .and_then(Value::as_str)
            .map_or_else(|| data.to_string(), ToString::to_string)
    }
}

fn root_namespace_body(rest: &str) -> Result<&str, DecodeError> {
    if !rest.starts_with('/') {
        return Ok(rest);
    }
    let (namespace, body) = rest.split_once(',').unwrap_or((rest, ""));
    if namespace == "/" {
        Ok(body)
    } else {
        Err(DecodeError::OtherNamespace(namespace.to_string()))
    }
}

fn split_ack_id(rest: &str) -> (Option<u64>, &str) {
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (None, rest);
    }
    let (id, body) = rest.split_at(digits);
    (id.parse().ok(), body)
}

fn parse_optional(body: &str) -> Result<Option<Value>, DecodeError> {
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| DecodeError::InvalidPayload(e.to_string()))
}

fn parse_array(body: &str) -> Result<Vec<Value>, DecodeError> {
    match serde_json::from_str(body) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(DecodeError::InvalidPayload(format!(
            "expected array, got {other}"
        ))),
        Err(e) => Err(DecodeError::InvalidPayload(e.to_string())),
    }
}

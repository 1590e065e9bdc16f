//! Bridge client for agent conversations.
//!
//! Turns the agent's asynchronous event stream into a request/response call:
//! - `Bridge` - pooled sessions, shutdown and per-conversation clients
//! - `ConversationClient::send_message` - one correlated exchange
//! - `SessionPool` - reference-counted sharing of transport sessions

pub mod bridge;
pub mod options;
pub mod pool;

pub use bridge::{Bridge, ConversationClient};
pub use options::BridgeOptions;
pub use pool::{SessionLease, SessionPool};

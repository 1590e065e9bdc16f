//! Core abstractions for bridging request/response calls onto agent event streams.
//!
//! This crate provides the fundamental building blocks:
//! - `OutboundAction` / `InboundEvent` - Wire values exchanged with the remote agent
//! - `SessionParams` - Everything needed to open a transport session
//! - `Connector` / `Session` traits - Transport seam
//! - `PendingExchange` - Correlation state with a single-use settlement guard

pub mod error;
pub mod exchange;
pub mod params;
pub mod protocol;
pub mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{BridgeError, TransportError};
pub use exchange::{Correlator, ExchangeResult, Observation, PendingExchange};
pub use params::SessionParams;
pub use protocol::{Ack, ConversationId, InboundEvent, OutboundAction};
pub use traits::{Connector, LifecycleSignal, Session, SessionSignal};

//! Transport seam: connectors open sessions, sessions carry actions and events.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use crate::{Ack, InboundEvent, OutboundAction, SessionParams, TransportError};

/// Connection lifecycle signal.
///
/// Diagnostic only, except `Closed`, which means the transport gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Namespace connect completed.
    Connected,
    /// A connect attempt failed.
    ConnectError(String),
    /// Starting reconnect attempt `n` (1-based).
    ReconnectAttempt(u32),
    /// A reconnect attempt failed.
    ReconnectError(String),
    /// The connection dropped; a reconnect may follow.
    Disconnected(String),
    /// The session is closed for good.
    Closed(String),
}

/// Item delivered to session subscribers, in transport order.
#[derive(Debug, Clone)]
pub enum SessionSignal {
    /// An inbound agent event.
    Event(InboundEvent),
    /// A connection lifecycle change.
    Lifecycle(LifecycleSignal),
}

/// Receiver resolving with the remote's ack.
///
/// Resolves with an error if the session goes away before the ack arrives.
pub type AckReceiver = oneshot::Receiver<Ack>;

/// A live transport session scoped to one conversation.
#[async_trait]
pub trait Session: Send + Sync {
    /// Emit one action and register an ack waiter.
    ///
    /// Actions emitted before the connection is up are buffered.
    async fn emit_action(&self, action: &OutboundAction) -> Result<AckReceiver, TransportError>;

    /// Subscribe to inbound events and lifecycle signals.
    ///
    /// Only items arriving after the call are delivered.
    fn subscribe(&self) -> broadcast::Receiver<SessionSignal>;

    /// Whether the session has been closed (locally or by giving up).
    fn is_closed(&self) -> bool;

    /// Tear the session down. Idempotent.
    fn close(&self);
}

/// Factory for transport sessions.
pub trait Connector: Send + Sync {
    /// Open a session.
    ///
    /// Returns immediately; the connection is established in the background
    /// and reported through `LifecycleSignal`s.
    ///
    /// # Errors
    /// Returns error if the parameters cannot produce a connection (e.g. a bad URL).
    fn open(&self, params: &SessionParams) -> Result<Arc<dyn Session>, TransportError>;
}

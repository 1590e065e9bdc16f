//! Request/response calls over the agent event stream.

use std::sync::Arc;

use agent_bridge_core::{
    BridgeError, Connector, ConversationId, ExchangeResult, LifecycleSignal, OutboundAction,
    PendingExchange, Session, SessionSignal, TransportError,
};
use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tokio_stream::{
    StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{BridgeOptions, pool::SessionPool};

/// Entry point for bridged conversations.
///
/// Holds the session pool and the shutdown token. Dropping an in-flight
/// `send_message` future abandons that exchange and releases its session.
pub struct Bridge {
    pool: SessionPool,
    options: BridgeOptions,
    shutdown: CancellationToken,
}

impl Bridge {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, options: BridgeOptions) -> Self {
        Self {
            pool: SessionPool::new(connector),
            options,
            shutdown: CancellationToken::new(),
        }
    }

    /// Client scoped to one conversation.
    #[must_use]
    pub fn create(&self, conversation_id: impl Into<ConversationId>) -> ConversationClient<'_> {
        ConversationClient {
            bridge: self,
            conversation_id: conversation_id.into(),
        }
    }

    #[must_use]
    pub const fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Number of live pooled sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.pool.len()
    }

    /// Cancel all in-flight exchanges and refuse new ones.
    pub fn shutdown(&self) {
        info!("Shutting down bridge");
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// One conversation on a `Bridge`.
pub struct ConversationClient<'a> {
    bridge: &'a Bridge,
    conversation_id: ConversationId,
}

impl ConversationClient<'_> {
    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Send a user message and wait for the agent's reply.
    ///
    /// Resolves with the last agent message seen before the agent went back
    /// to awaiting input, `None` if the turn ended without one, or the last
    /// agent message seen when the completion timeout elapses.
    ///
    /// # Errors
    /// Returns `Timeout` if nothing was captured in time, `Transport` if the
    /// session could not be opened or gave up, and `Cancelled` on shutdown.
    pub async fn send_message(&self, text: &str) -> ExchangeResult {
        self.send_message_with_cancel(text, &CancellationToken::new())
            .await
    }

    /// Like `send_message`, also ending with `Cancelled` when `cancel` fires.
    ///
    /// # Errors
    /// See `send_message`.
    pub async fn send_message_with_cancel(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> ExchangeResult {
        let bridge = self.bridge;
        if bridge.is_shut_down() || cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let completion_timeout = bridge.options.completion_timeout;
        let deadline = Instant::now() + completion_timeout;
        let params = bridge.options.session_params(self.conversation_id.clone());
        let lease = bridge.pool.acquire(&params)?;

        // Exchanges on one conversation run one at a time. Queueing counts
        // against the same deadline as the exchange itself.
        let _turn = tokio::select! {
            biased;
            () = bridge.shutdown.cancelled() => return Err(BridgeError::Cancelled),
            () = cancel.cancelled() => return Err(BridgeError::Cancelled),
            guard = timeout_at(deadline, lease.lock_exchange()) => match guard {
                Ok(guard) if Instant::now() < deadline => guard,
                _ => {
                    warn!(
                        conversation_id = %self.conversation_id,
                        "Timed out waiting for an earlier exchange on this conversation"
                    );
                    return Err(BridgeError::Timeout { after: completion_timeout });
                }
            },
        };

        if lease.session().is_closed() {
            return Err(TransportError::Closed("session closed before send".to_string()).into());
        }

        run_exchange(
            lease.session().as_ref(),
            &self.conversation_id,
            text,
            &bridge.options,
            deadline,
            cancel,
            &bridge.shutdown,
        )
        .await
    }
}

async fn run_exchange(
    session: &dyn Session,
    conversation_id: &ConversationId,
    text: &str,
    options: &BridgeOptions,
    deadline: Instant,
    cancel: &CancellationToken,
    shutdown: &CancellationToken,
) -> ExchangeResult {
    let (mut pending, settled) = PendingExchange::new();
    let exchange_id = pending.id();

    // Subscribe before emitting so no reply can slip past.
    let mut events = BroadcastStream::new(session.subscribe());

    let action = OutboundAction::user_message(text);
    info!(%conversation_id, %exchange_id, "Sending user message");
    debug!(%exchange_id, "Outbound action: {action:?}");
    let ack_rx = session.emit_action(&action).await?;

    let ack = timeout(options.ack_timeout, ack_rx);
    tokio::pin!(ack);
    let mut awaiting_ack = true;

    let deadline = sleep_until(deadline);
    tokio::pin!(deadline);

    while !pending.is_settled() {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                pending.fail(BridgeError::Cancelled);
            }
            () = cancel.cancelled() => {
                pending.fail(BridgeError::Cancelled);
            }
            item = events.next() => match item {
                Some(Ok(SessionSignal::Event(event))) => {
                    debug!(%exchange_id, event_id = ?event.id(), source = ?event.source(), "Inbound event");
                    pending.on_event(event);
                }
                Some(Ok(SessionSignal::Lifecycle(signal))) => {
                    on_lifecycle(&mut pending, signal, options.fail_fast);
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(%exchange_id, "Event subscriber lagged, {skipped} events dropped");
                }
                None => {
                    pending.fail(TransportError::Closed("event stream ended".to_string()).into());
                }
            },
            () = &mut deadline => {
                pending.on_timeout(options.completion_timeout);
            }
            result = &mut ack, if awaiting_ack => {
                awaiting_ack = false;
                match result {
                    Ok(Ok(ack)) if ack.is_received() => {
                        info!(%exchange_id, "Server acknowledged message delivery");
                    }
                    Ok(Ok(ack)) => {
                        warn!(%exchange_id, "Unexpected acknowledgment: {}", ack.as_value());
                    }
                    Ok(Err(_)) | Err(_) => {
                        warn!(%exchange_id, "No explicit acknowledgment from server");
                    }
                }
            }
        }
    }

    let outcome = settled
        .await
        .unwrap_or_else(|_| Err(BridgeError::Cancelled));
    match &outcome {
        Ok(Some(_)) => info!(%conversation_id, %exchange_id, "Exchange completed"),
        Ok(None) => info!(%conversation_id, %exchange_id, "Exchange completed without a reply"),
        Err(e) => warn!(%conversation_id, %exchange_id, "Exchange failed: {e}"),
    }
    outcome
}

fn on_lifecycle(pending: &mut PendingExchange, signal: LifecycleSignal, fail_fast: bool) {
    match signal {
        LifecycleSignal::Closed(reason) => {
            pending.fail(TransportError::Closed(reason).into());
        }
        LifecycleSignal::ConnectError(reason) if fail_fast => {
            pending.fail(TransportError::Connect(reason).into());
        }
        other => debug!("Lifecycle signal during exchange: {other:?}"),
    }
}

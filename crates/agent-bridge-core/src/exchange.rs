//! Correlation of one request with its reply in the inbound event stream.

use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{BridgeError, InboundEvent, protocol::AWAITING_USER_INPUT};

/// Outcome of one exchange. `Ok(None)` is a successful but empty reply.
pub type ExchangeResult = Result<Option<InboundEvent>, BridgeError>;

/// What a single event meant to the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Not relevant to this exchange.
    Ignored,
    /// Became the current candidate reply.
    Candidate,
    /// Ended the agent's turn.
    Terminal,
}

/// Candidate capture and terminal detection.
///
/// The two checks are independent: the terminal event need not carry the
/// reply, and content may arrive in a separate event on either side of it.
#[derive(Debug, Default)]
pub struct Correlator {
    candidate: Option<InboundEvent>,
}

impl Correlator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply both predicates to one event.
    ///
    /// Capture runs first, so a terminal event carrying a message becomes the
    /// candidate it settles with.
    pub fn observe(&mut self, event: InboundEvent) -> Observation {
        if !event.is_from_agent() {
            return Observation::Ignored;
        }

        let terminal = event.agent_state() == Some(AWAITING_USER_INPUT);
        let captured = if event.has_message() {
            self.candidate = Some(event);
            true
        } else {
            false
        };

        match (terminal, captured) {
            (true, _) => Observation::Terminal,
            (false, true) => Observation::Candidate,
            (false, false) => Observation::Ignored,
        }
    }

    /// Current candidate reply.
    #[must_use]
    pub const fn candidate(&self) -> Option<&InboundEvent> {
        self.candidate.as_ref()
    }

    /// Take the current candidate reply.
    pub const fn take_candidate(&mut self) -> Option<InboundEvent> {
        self.candidate.take()
    }
}

/// Transient state for one in-flight exchange.
///
/// The settlement sender is consumed by the first path that settles; every
/// later attempt is a no-op that returns `false`.
#[derive(Debug)]
pub struct PendingExchange {
    id: Uuid,
    correlator: Correlator,
    settle_tx: Option<oneshot::Sender<ExchangeResult>>,
}

impl PendingExchange {
    /// Create a pending exchange and the receiver its settlement lands on.
    #[must_use]
    pub fn new() -> (Self, oneshot::Receiver<ExchangeResult>) {
        let (settle_tx, settle_rx) = oneshot::channel();
        let pending = Self {
            id: Uuid::new_v4(),
            correlator: Correlator::new(),
            settle_tx: Some(settle_tx),
        };
        (pending, settle_rx)
    }

    /// Exchange id, for log correlation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Whether a settlement already happened.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.settle_tx.is_none()
    }

    /// Current candidate reply.
    #[must_use]
    pub const fn candidate(&self) -> Option<&InboundEvent> {
        self.correlator.candidate()
    }

    /// Feed one inbound event. Returns `true` if it settled the exchange.
    ///
    /// Events after settlement are dropped without touching the candidate.
    pub fn on_event(&mut self, event: InboundEvent) -> bool {
        if self.is_settled() {
            return false;
        }

        match self.correlator.observe(event) {
            Observation::Terminal => {
                let reply = self.correlator.take_candidate();
                tracing::debug!(
                    exchange_id = %self.id,
                    has_reply = reply.is_some(),
                    "Terminal agent event observed"
                );
                self.settle(Ok(reply))
            }
            Observation::Candidate => {
                tracing::trace!(exchange_id = %self.id, "Captured candidate reply");
                false
            }
            Observation::Ignored => false,
        }
    }

    /// Completion timer fired. Settles with the candidate if one was captured,
    /// otherwise with a timeout failure.
    pub fn on_timeout(&mut self, after: Duration) -> bool {
        if self.is_settled() {
            return false;
        }

        match self.correlator.take_candidate() {
            Some(reply) => {
                tracing::warn!(
                    exchange_id = %self.id,
                    "No terminal event before timeout, returning last candidate reply"
                );
                self.settle(Ok(Some(reply)))
            }
            None => self.settle(Err(BridgeError::Timeout { after })),
        }
    }

    /// Settle with a failure.
    pub fn fail(&mut self, error: BridgeError) -> bool {
        self.settle(Err(error))
    }

    fn settle(&mut self, result: ExchangeResult) -> bool {
        match self.settle_tx.take() {
            Some(tx) => {
                // Receiver may already be gone if the caller stopped waiting.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

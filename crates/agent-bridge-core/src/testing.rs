//! Scripted in-memory transport for tests.
//!
//! `FakeSession` replays a fixed list of signals every time an action is
//! emitted, which mirrors the remote answering the action on a live stream.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

use crate::{
    Ack, Connector, InboundEvent, LifecycleSignal, OutboundAction, Session, SessionParams,
    SessionSignal, TransportError,
    traits::AckReceiver,
};

/// In-memory session driven by a script.
pub struct FakeSession {
    params: SessionParams,
    events: broadcast::Sender<SessionSignal>,
    script: Vec<SessionSignal>,
    ack: Option<Ack>,
    emitted: Mutex<Vec<OutboundAction>>,
    unacked: Mutex<Vec<oneshot::Sender<Ack>>>,
    closed: AtomicBool,
}

impl FakeSession {
    /// Create a session that replays `script` after each emitted action and
    /// acks with `ack` (or never, when `None`).
    #[must_use]
    pub fn new(params: SessionParams, script: Vec<SessionSignal>, ack: Option<Ack>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            params,
            events,
            script,
            ack,
            emitted: Mutex::new(Vec::new()),
            unacked: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Parameters the session was opened with.
    #[must_use]
    pub const fn params(&self) -> &SessionParams {
        &self.params
    }

    /// Push a signal to current subscribers.
    pub fn push(&self, signal: SessionSignal) {
        let _ = self.events.send(signal);
    }

    /// Push a raw JSON event to current subscribers.
    pub fn push_event(&self, raw: Value) {
        self.push(SessionSignal::Event(InboundEvent::new(raw)));
    }

    /// Actions emitted so far.
    #[must_use]
    pub fn emitted(&self) -> Vec<OutboundAction> {
        self.emitted.lock().unwrap().clone()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn emit_action(&self, action: &OutboundAction) -> Result<AckReceiver, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed("fake session closed".to_string()));
        }
        self.emitted.lock().unwrap().push(action.clone());

        let (ack_tx, ack_rx) = oneshot::channel();
        if let Some(ack) = &self.ack {
            let _ = ack_tx.send(ack.clone());
        } else {
            // Pending until the session closes.
            self.unacked.lock().unwrap().push(ack_tx);
        }

        for signal in &self.script {
            self.push(signal.clone());
        }
        Ok(ack_rx)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.events.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.unacked.lock().unwrap().clear();
            self.push(SessionSignal::Lifecycle(LifecycleSignal::Closed(
                "closed by client".to_string(),
            )));
        }
    }
}

/// Connector handing out `FakeSession`s with a shared script.
#[derive(Default)]
pub struct FakeConnector {
    script: Vec<SessionSignal>,
    ack: Option<Ack>,
    open_error: Option<TransportError>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeConnector {
    /// Connector whose sessions replay `script` after each action.
    #[must_use]
    pub fn with_script(script: Vec<SessionSignal>) -> Self {
        Self {
            script,
            ack: Some(Ack::new(serde_json::json!({ "status": "received" }))),
            ..Self::default()
        }
    }

    /// Connector whose sessions replay raw JSON events after each action.
    #[must_use]
    pub fn with_events(events: Vec<Value>) -> Self {
        Self::with_script(
            events
                .into_iter()
                .map(|raw| SessionSignal::Event(InboundEvent::new(raw)))
                .collect(),
        )
    }

    /// Connector whose `open` always fails.
    #[must_use]
    pub fn failing(error: TransportError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::default()
        }
    }

    /// Override the ack sessions reply with (`None` = never ack).
    #[must_use]
    pub fn with_ack(mut self, ack: Option<Ack>) -> Self {
        self.ack = ack;
        self
    }

    /// Sessions opened so far.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().unwrap().clone()
    }

    /// Number of sessions opened so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

impl Connector for FakeConnector {
    fn open(&self, params: &SessionParams) -> Result<Arc<dyn Session>, TransportError> {
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }
        let session = Arc::new(FakeSession::new(
            params.clone(),
            self.script.clone(),
            self.ack.clone(),
        ));
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

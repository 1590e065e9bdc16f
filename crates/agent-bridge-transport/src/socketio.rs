//! Socket.IO client session over a WebSocket.
//!
//! Each session owns one background driver task. The driver connects, runs the
//! Engine.IO heartbeat, performs the namespace connect with the bearer
//! credential, forwards inbound events to subscribers, resolves acks, and
//! reconnects with backoff until it runs out of attempts.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use agent_bridge_core::{
    Ack, ConversationId, InboundEvent, LifecycleSignal, OutboundAction, Session, SessionParams,
    SessionSignal, TransportError,
    protocol::{ACTION_EVENT, EVENT_NAME},
    traits::{AckReceiver, Connector},
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, oneshot},
    time::{Instant, sleep, sleep_until, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    endpoint::socket_url,
    protocol::{DecodeError, EnginePacket, OpenHandshake, SocketPacket},
};

/// Type alias for the WebSocket connection.
type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for connection behavior.
#[derive(Debug, Clone)]
pub struct SocketIoOptions {
    /// Reconnect attempts after a failure before the session is closed.
    pub reconnect_attempts: u32,
    /// Initial delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Upper bound for the reconnect delay.
    pub reconnect_delay_max: Duration,
    /// Timeout for the WebSocket and namespace handshake.
    pub connect_timeout: Duration,
    /// Capacity of the subscriber broadcast channel.
    pub event_capacity: usize,
    /// Capacity of the outbound command queue.
    pub command_capacity: usize,
}

impl Default for SocketIoOptions {
    fn default() -> Self {
        Self {
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(20),
            event_capacity: 1024,
            command_capacity: 100,
        }
    }
}

impl SocketIoOptions {
    /// Delay before reconnect attempt `attempt` (1-based), doubling up to the max.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.reconnect_delay_max)
    }
}

/// Connector opening Socket.IO sessions.
#[derive(Debug, Clone, Default)]
pub struct SocketIoConnector {
    options: SocketIoOptions,
}

impl SocketIoConnector {
    /// Create a connector with custom options.
    #[must_use]
    pub const fn new(options: SocketIoOptions) -> Self {
        Self { options }
    }
}

impl Connector for SocketIoConnector {
    fn open(&self, params: &SessionParams) -> Result<Arc<dyn Session>, TransportError> {
        let url = socket_url(params)?;
        let session = SocketIoSession::spawn(
            url,
            params.conversation_id.clone(),
            Arc::clone(&params.token),
            self.options.clone(),
        );
        Ok(Arc::new(session))
    }
}

/// Outbound emit waiting for the driver.
struct Emit {
    event: &'static str,
    payload: Value,
    ack_tx: oneshot::Sender<Ack>,
}

/// Handle to a Socket.IO session.
pub struct SocketIoSession {
    commands: mpsc::Sender<Emit>,
    events: broadcast::Sender<SessionSignal>,
    shutdown: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl SocketIoSession {
    /// Spawn the driver task and return a handle.
    #[must_use]
    pub fn spawn(
        url: Url,
        conversation_id: ConversationId,
        token: Arc<SecretString>,
        options: SocketIoOptions,
    ) -> Self {
        let (commands, commands_rx) = mpsc::channel(options.command_capacity);
        let (events, _) = broadcast::channel(options.event_capacity);
        let shutdown = CancellationToken::new();
        let closed = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            url,
            conversation_id,
            token,
            options,
            events: events.clone(),
            commands: commands_rx,
            shutdown: shutdown.clone(),
            closed: Arc::clone(&closed),
            outbox: VecDeque::new(),
            pending_acks: HashMap::new(),
            next_ack_id: 0,
        };
        tokio::spawn(driver.run());

        Self {
            commands,
            events,
            shutdown,
            closed,
        }
    }
}

#[async_trait]
impl Session for SocketIoSession {
    async fn emit_action(&self, action: &OutboundAction) -> Result<AckReceiver, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed("session already closed".to_string()));
        }
        let payload = serde_json::to_value(action)
            .map_err(|e| TransportError::Protocol(format!("Failed to encode action: {e}")))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Emit {
                event: ACTION_EVENT,
                payload,
                ack_tx,
            })
            .await
            .map_err(|_| TransportError::Closed("session driver stopped".to_string()))?;
        Ok(ack_rx)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.events.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for SocketIoSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// How one connection ended.
#[derive(Debug)]
enum RunOutcome {
    /// Closed locally.
    Shutdown,
    /// Server disconnected the namespace; no reconnect.
    ServerClosed(String),
    /// Server refused the namespace connect; no reconnect.
    Refused(String),
    /// Could not establish the connection.
    ConnectFailed(String),
    /// Established connection dropped.
    Lost(String),
}

enum Flow {
    Continue,
    Heartbeat,
    /// Frame to write back, such as an ack the server asked for.
    Reply(String),
    Exit(RunOutcome),
}

struct Driver {
    url: Url,
    conversation_id: ConversationId,
    token: Arc<SecretString>,
    options: SocketIoOptions,
    events: broadcast::Sender<SessionSignal>,
    commands: mpsc::Receiver<Emit>,
    shutdown: CancellationToken,
    closed: Arc<AtomicBool>,
    /// Emits not yet written to a live connection.
    outbox: VecDeque<Emit>,
    pending_acks: HashMap<u64, oneshot::Sender<Ack>>,
    next_ack_id: u64,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            match self.connect_and_run().await {
                RunOutcome::Shutdown => return self.finish("closed by client".to_string()),
                RunOutcome::ServerClosed(reason) => return self.finish(reason),
                RunOutcome::Refused(reason) => {
                    self.signal(LifecycleSignal::ConnectError(reason.clone()));
                    return self.finish(format!("connection refused: {reason}"));
                }
                RunOutcome::ConnectFailed(reason) => {
                    if attempt == 0 {
                        self.signal(LifecycleSignal::ConnectError(reason));
                    } else {
                        self.signal(LifecycleSignal::ReconnectError(reason));
                    }
                }
                RunOutcome::Lost(reason) => {
                    // Acks for frames already written will never arrive.
                    self.pending_acks.clear();
                    self.signal(LifecycleSignal::Disconnected(reason));
                    attempt = 0;
                }
            }

            attempt += 1;
            if attempt > self.options.reconnect_attempts {
                let reason = format!(
                    "gave up after {} reconnection attempts",
                    self.options.reconnect_attempts
                );
                return self.finish(reason);
            }

            self.signal(LifecycleSignal::ReconnectAttempt(attempt));
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    return self.finish("closed by client".to_string());
                }
                () = sleep(self.options.backoff(attempt)) => {}
            }
        }
    }

    async fn connect_and_run(&mut self) -> RunOutcome {
        let shutdown = self.shutdown.clone();
        let handshake = timeout(self.options.connect_timeout, self.handshake());

        let (mut ws, open) = tokio::select! {
            biased;
            () = shutdown.cancelled() => return RunOutcome::Shutdown,
            result = handshake => match result {
                Err(_) => return RunOutcome::ConnectFailed("connection timed out".to_string()),
                Ok(Err(outcome)) => return outcome,
                Ok(Ok(connected)) => connected,
            },
        };

        self.signal(LifecycleSignal::Connected);

        while let Some(emit) = self.outbox.pop_front() {
            if let Err(outcome) = self.write_emit(&mut ws, emit).await {
                return outcome;
            }
        }

        let heartbeat = Duration::from_millis(open.ping_interval.saturating_add(open.ping_timeout));
        let mut deadline = Instant::now() + heartbeat;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    let _ = ws.send(WsMessage::text(SocketPacket::Disconnect.to_frame())).await;
                    let _ = ws.close(None).await;
                    return RunOutcome::Shutdown;
                }
                command = self.commands.recv() => {
                    let Some(emit) = command else {
                        // Every session handle is gone.
                        let _ = ws.close(None).await;
                        return RunOutcome::Shutdown;
                    };
                    if let Err(outcome) = self.write_emit(&mut ws, emit).await {
                        return outcome;
                    }
                }
                () = sleep_until(deadline) => {
                    return RunOutcome::Lost("ping timeout".to_string());
                }
                frame = ws.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => match self.handle_frame(&mut ws, &text).await {
                        Flow::Continue => {}
                        Flow::Heartbeat => deadline = Instant::now() + heartbeat,
                        Flow::Reply(reply) => {
                            if let Err(e) = ws.send(WsMessage::text(reply)).await {
                                return RunOutcome::Lost(format!("failed to send ack: {e}"));
                            }
                        }
                        Flow::Exit(outcome) => return outcome,
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return RunOutcome::Lost("transport close".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return RunOutcome::Lost(format!("transport error: {e}")),
                },
            }
        }
    }

    /// Open the WebSocket, read the Engine.IO open packet and join the root
    /// namespace.
    async fn handshake(&self) -> Result<(WsConnection, OpenHandshake), RunOutcome> {
        debug!(conversation_id = %self.conversation_id, url = %self.url.as_str(), "Connecting");
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RunOutcome::ConnectFailed(e.to_string()))?;

        let open = loop {
            let text = next_text(&mut ws).await?;
            match EnginePacket::decode(&text) {
                Ok(EnginePacket::Open(open)) => break open,
                Ok(other) => debug!("Ignoring packet before open: {other:?}"),
                Err(e) => return Err(RunOutcome::ConnectFailed(format!("bad open packet: {e}"))),
            }
        };

        let auth = serde_json::json!({ "token": self.token.expose_secret() });
        ws.send(WsMessage::text(SocketPacket::Connect(Some(auth)).to_frame()))
            .await
            .map_err(|e| RunOutcome::ConnectFailed(e.to_string()))?;

        loop {
            let text = next_text(&mut ws).await?;
            match EnginePacket::decode(&text) {
                Ok(EnginePacket::Ping(data)) => {
                    ws.send(WsMessage::text(EnginePacket::Pong(data).encode()))
                        .await
                        .map_err(|e| RunOutcome::ConnectFailed(e.to_string()))?;
                }
                Ok(EnginePacket::Message(payload)) => match SocketPacket::decode(&payload) {
                    Ok(SocketPacket::Connect(_)) => return Ok((ws, open)),
                    Ok(SocketPacket::ConnectError(data)) => {
                        return Err(RunOutcome::Refused(SocketPacket::error_message(&data)));
                    }
                    Ok(other) => debug!("Ignoring packet before connect: {other:?}"),
                    Err(e) => warn!("Invalid packet during connect: {e}"),
                },
                Ok(EnginePacket::Close) => {
                    return Err(RunOutcome::ConnectFailed("server closed transport".to_string()));
                }
                Ok(_) => {}
                Err(e) => warn!("Invalid frame during connect: {e}"),
            }
        }
    }

    async fn handle_frame(&mut self, ws: &mut WsConnection, text: &str) -> Flow {
        let packet = match EnginePacket::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(conversation_id = %self.conversation_id, "Invalid frame: {e}");
                return Flow::Continue;
            }
        };

        match packet {
            EnginePacket::Ping(data) => {
                if let Err(e) = ws.send(WsMessage::text(EnginePacket::Pong(data).encode())).await {
                    return Flow::Exit(RunOutcome::Lost(format!("failed to send pong: {e}")));
                }
                Flow::Heartbeat
            }
            EnginePacket::Close => {
                Flow::Exit(RunOutcome::Lost("server closed transport".to_string()))
            }
            EnginePacket::Message(payload) => self.handle_packet(&payload),
            EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {
                Flow::Continue
            }
        }
    }

    fn handle_packet(&mut self, payload: &str) -> Flow {
        let packet = match SocketPacket::decode(payload) {
            Ok(packet) => packet,
            Err(DecodeError::OtherNamespace(namespace)) => {
                debug!(conversation_id = %self.conversation_id, "Dropping packet for {namespace}");
                return Flow::Continue;
            }
            Err(e) => {
                warn!(conversation_id = %self.conversation_id, "Invalid packet: {e}");
                return Flow::Continue;
            }
        };

        match packet {
            SocketPacket::Event { id, name, args } => {
                if name == EVENT_NAME {
                    let raw = args.into_iter().next().unwrap_or(Value::Null);
                    debug!(conversation_id = %self.conversation_id, "Received event: {raw}");
                    let _ = self
                        .events
                        .send(SessionSignal::Event(InboundEvent::new(raw)));
                } else {
                    debug!(conversation_id = %self.conversation_id, "Ignoring event {name}");
                }
                if let Some(id) = id {
                    return Flow::Reply(SocketPacket::Ack { id, args: Vec::new() }.to_frame());
                }
            }
            SocketPacket::Ack { id, args } => match self.pending_acks.remove(&id) {
                Some(ack_tx) => {
                    let raw = args.into_iter().next().unwrap_or(Value::Null);
                    let _ = ack_tx.send(Ack::new(raw));
                }
                None => debug!("Ack for unknown id {id}"),
            },
            SocketPacket::Disconnect => {
                return Flow::Exit(RunOutcome::ServerClosed("io server disconnect".to_string()));
            }
            SocketPacket::ConnectError(data) => {
                return Flow::Exit(RunOutcome::Refused(SocketPacket::error_message(&data)));
            }
            SocketPacket::Connect(_) => {}
        }
        Flow::Continue
    }

    /// Write one emit. On failure the emit is queued for the next connection.
    async fn write_emit(&mut self, ws: &mut WsConnection, emit: Emit) -> Result<(), RunOutcome> {
        let id = self.next_ack_id;
        let frame = SocketPacket::event(emit.event, emit.payload.clone(), Some(id)).to_frame();
        debug!(conversation_id = %self.conversation_id, ack_id = id, "Sending {}", emit.event);

        if let Err(e) = ws.send(WsMessage::text(frame)).await {
            self.outbox.push_front(emit);
            return Err(RunOutcome::Lost(format!("failed to send: {e}")));
        }

        self.next_ack_id += 1;
        self.pending_acks.insert(id, emit.ack_tx);
        Ok(())
    }

    fn signal(&self, signal: LifecycleSignal) {
        let conversation_id = &self.conversation_id;
        match &signal {
            LifecycleSignal::Connected => info!(%conversation_id, "Connected to server"),
            LifecycleSignal::ConnectError(reason) => {
                error!(%conversation_id, "Connection error: {reason}");
            }
            LifecycleSignal::ReconnectAttempt(n) => {
                info!(%conversation_id, attempt = n, "Attempting to reconnect");
            }
            LifecycleSignal::ReconnectError(reason) => {
                error!(%conversation_id, "Reconnection error: {reason}");
            }
            LifecycleSignal::Disconnected(reason) => {
                warn!(%conversation_id, "Disconnected: {reason}");
            }
            LifecycleSignal::Closed(reason) => info!(%conversation_id, "Session closed: {reason}"),
        }
        let _ = self.events.send(SessionSignal::Lifecycle(signal));
    }

    fn finish(mut self, reason: String) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending_acks.clear();
        self.outbox.clear();
        self.commands.close();
        self.signal(LifecycleSignal::Closed(reason));
    }
}

async fn next_text(ws: &mut WsConnection) -> Result<String, RunOutcome> {
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(text.to_string()),
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(RunOutcome::ConnectFailed("transport close".to_string()));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(RunOutcome::ConnectFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    const OPEN: &str =
        r#"0{"sid":"engine-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

    fn params(addr: std::net::SocketAddr) -> SessionParams {
        SessionParams::new(
            format!("ws://{addr}"),
            ConversationId::new("conv-1"),
            Arc::new(SecretString::from("external-access-token".to_string())),
        )
    }

    fn quick_options() -> SocketIoOptions {
        SocketIoOptions {
            reconnect_attempts: 0,
            connect_timeout: Duration::from_secs(5),
            ..SocketIoOptions::default()
        }
    }

    async fn recv_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return text.to_string(),
                Some(Ok(_)) => {}
                other => panic!("Unexpected frame: {other:?}"),
            }
        }
    }

    async fn next_signal(rx: &mut broadcast::Receiver<SessionSignal>) -> SessionSignal {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("signal within timeout")
            .expect("channel open")
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let options = SocketIoOptions::default();
        assert_eq!(options.backoff(1), Duration::from_secs(1));
        assert_eq!(options.backoff(2), Duration::from_secs(2));
        assert_eq!(options.backoff(3), Duration::from_secs(4));
        assert_eq!(options.backoff(4), Duration::from_secs(5));
        assert_eq!(options.backoff(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_open() {
        let connector = SocketIoConnector::default();
        let mut params = params(([127, 0, 0, 1], 1).into());
        params.remote_url = "ftp://nowhere".to_string();
        assert!(matches!(
            connector.open(&params),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_with_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(WsMessage::text(OPEN)).await.unwrap();

            let connect = recv_text(&mut ws).await;
            assert_eq!(connect, r#"40{"token":"external-access-token"}"#);
            ws.send(WsMessage::text(r#"40{"sid":"socket-sid"}"#)).await.unwrap();

            let emit = recv_text(&mut ws).await;
            assert!(emit.starts_with(r#"420["oh_action","#), "got {emit}");
            assert!(emit.contains(r#""wait_for_response":true"#));

            ws.send(WsMessage::text(r#"430[{"status":"received"}]"#)).await.unwrap();
            ws.send(WsMessage::text("2")).await.unwrap();
            assert_eq!(recv_text(&mut ws).await, "3");
            ws.send(WsMessage::text(
                r#"42/admin,["oh_event",{"source":"agent","message":"wrong namespace"}]"#,
            ))
            .await
            .unwrap();
            ws.send(WsMessage::text(
                r#"427["oh_event",{"source":"agent","message":"4","extras":{"agent_state":"awaiting_user_input"}}]"#,
            ))
            .await
            .unwrap();
            assert_eq!(recv_text(&mut ws).await, "437[]");

            assert_eq!(recv_text(&mut ws).await, "41");
        });

        let connector = SocketIoConnector::new(quick_options());
        let session = connector.open(&params(addr)).unwrap();
        let mut rx = session.subscribe();

        let ack_rx = session
            .emit_action(&OutboundAction::user_message("2 + 2?"))
            .await
            .unwrap();

        let SessionSignal::Lifecycle(LifecycleSignal::Connected) = next_signal(&mut rx).await
        else {
            panic!("Expected connect signal");
        };

        let ack = timeout(Duration::from_secs(5), ack_rx).await.unwrap().unwrap();
        assert!(ack.is_received());

        let SessionSignal::Event(event) = next_signal(&mut rx).await else {
            panic!("Expected event");
        };
        assert_eq!(event.message(), Some("4"));

        session.close();
        server.await.unwrap();

        let SessionSignal::Lifecycle(LifecycleSignal::Closed(_)) = next_signal(&mut rx).await
        else {
            panic!("Expected closed signal");
        };
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_refused_connect_closes_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(WsMessage::text(OPEN)).await.unwrap();
            let _ = recv_text(&mut ws).await;
            ws.send(WsMessage::text(r#"44{"message":"Invalid token"}"#))
                .await
                .unwrap();
        });

        let session = SocketIoConnector::new(quick_options())
            .open(&params(addr))
            .unwrap();
        let mut rx = session.subscribe();

        let SessionSignal::Lifecycle(LifecycleSignal::ConnectError(reason)) =
            next_signal(&mut rx).await
        else {
            panic!("Expected connect error");
        };
        assert_eq!(reason, "Invalid token");

        let SessionSignal::Lifecycle(LifecycleSignal::Closed(_)) = next_signal(&mut rx).await
        else {
            panic!("Expected closed signal");
        };
        assert!(session.is_closed());
        assert!(
            session
                .emit_action(&OutboundAction::user_message("late"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_gives_up() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let options = SocketIoOptions {
            reconnect_attempts: 1,
            reconnect_delay: Duration::from_millis(10),
            ..quick_options()
        };
        let session = SocketIoConnector::new(options).open(&params(addr)).unwrap();
        let mut rx = session.subscribe();

        let mut seen = Vec::new();
        loop {
            let SessionSignal::Lifecycle(signal) = next_signal(&mut rx).await else {
                continue;
            };
            let done = matches!(signal, LifecycleSignal::Closed(_));
            seen.push(signal);
            if done {
                break;
            }
        }

        assert!(matches!(seen[0], LifecycleSignal::ConnectError(_)));
        assert_eq!(seen[1], LifecycleSignal::ReconnectAttempt(1));
        assert!(matches!(seen[2], LifecycleSignal::ReconnectError(_)));
        assert!(matches!(seen[3], LifecycleSignal::Closed(_)));
        assert!(session.is_closed());
    }
}

//! Socket.IO over WebSocket transport for agent event streams.
//!
//! Provides:
//! - Engine.IO / Socket.IO packet codec
//! - Endpoint URL construction
//! - `SocketIoConnector` - a `Connector` backed by `tokio-tungstenite`

pub mod endpoint;
pub mod protocol;
pub mod socketio;

pub use protocol::{EnginePacket, SocketPacket};
pub use socketio::{SocketIoConnector, SocketIoOptions, SocketIoSession};

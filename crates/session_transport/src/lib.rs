#![forbid(unsafe_code)]
//! Client side of an agent console's realtime channel.
//!
//! One WebSocket carries every session, shell and global event as a
//! `{type, data}` [`Envelope`]. [`ConnectionManager`] owns that socket: it
//! authenticates with a credential taken from a watch channel, queues outbound
//! traffic until the server announces `global.connected`, reconnects with
//! bounded backoff after unexpected closes, and gives up for good on a policy
//! close (1008). Inbound envelopes fan out through an [`EventBus`].
//!
//! The lifecycle rules live in [`ConnectionMachine`], a pure state machine
//! that can be driven without sockets or clocks.
//!
//! ```no_run
//! use session_transport::{ConnectionConfig, ConnectionManager, EventBus, WsConnector};
//! use tokio::sync::watch;
//!
//! # async fn demo() -> Result<(), session_transport::TransportError> {
//! let (_credentials, rx) = watch::channel(Some("token".to_string()));
//! let bus = EventBus::new();
//! let mut output = bus.subscribe("session.abc.output");
//! let manager = ConnectionManager::start(ConnectionConfig::default(), rx, WsConnector, bus)?;
//! manager.send_session("abc", "input", serde_json::json!({"text": "ls\n"}))?;
//! if let Some(chunk) = output.recv().await {
//!     println!("{chunk}");
//! }
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod bus;
mod config;
mod envelope;
mod error;
mod manager;
mod state;
mod transport;

#[cfg(test)]
mod test_support;

pub use bus::{EventBus, Handler, HandlerError, Subscription};
pub use config::{
    ConnectionConfig, ReconnectPolicy, DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_URL,
};
pub use envelope::{Envelope, Topic, EVENT_CONNECTED, EVENT_ERROR};
pub use error::{ConfigError, TransportError};
pub use manager::ConnectionManager;
pub use state::{
    Action, ConnectionMachine, ConnectionStatus, Input, ReadyState, TerminalReason,
    TransportEvent, ABNORMAL_CLOSURE, POLICY_VIOLATION,
};
pub use transport::{Connector, Outgoing, TransportEvents, TransportLink, WsConnector};

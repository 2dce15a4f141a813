use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use crate::state::{Input, TransportEvent, ABNORMAL_CLOSURE, POLICY_VIOLATION};

/// Close code reported when the server closes without giving one.
const NO_STATUS: u16 = 1005;
const NORMAL_CLOSURE: u16 = 1000;

/// Reports lifecycle events for one transport attempt back to the manager.
/// Every event is stamped with the attempt's generation.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<Input>,
}

impl TransportEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn report(&self, event: TransportEvent) {
        let _ = self.tx.send(Input::Transport {
            generation: self.generation,
            event,
        });
    }

    pub fn opened(&self) {
        self.report(TransportEvent::Opened);
    }

    pub fn message(&self, text: impl Into<String>) {
        self.report(TransportEvent::Message(text.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.report(TransportEvent::Error(message.into()));
    }

    pub fn closed(&self, code: Option<u16>, reason: impl Into<String>) {
        self.report(TransportEvent::Closed {
            code,
            reason: reason.into(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// Outbound half of one transport attempt.
#[derive(Debug)]
pub struct TransportLink {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl TransportLink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn send_text(&self, text: String) -> bool {
        self.tx.send(Outgoing::Text(text)).is_ok()
    }

    /// Requests a close. A link that is still opening closes right after it
    /// opens.
    pub(crate) fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}

/// Opens transports. Implementations must eventually report exactly one
/// `closed` for every attempt, including attempts that never opened.
pub trait Connector: Send + 'static {
    fn open(&mut self, endpoint: &str, events: TransportEvents) -> TransportLink;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&mut self, endpoint: &str, events: TransportEvents) -> TransportLink {
        let (link, outgoing) = TransportLink::channel();
        tokio::spawn(socket_task(endpoint.to_string(), events, outgoing));
        link
    }
}

async fn socket_task(
    endpoint: String,
    events: TransportEvents,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    let socket = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(err) => {
            let code = rejection_code(&err).unwrap_or(ABNORMAL_CLOSURE);
            events.error(format!("connect failed: {err}"));
            events.closed(Some(code), err.to_string());
            return;
        }
    };
    debug!(generation = events.generation(), "websocket open");
    events.opened();

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        events.error(format!("send failed: {err}"));
                        events.closed(Some(ABNORMAL_CLOSURE), err.to_string());
                        return;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    events.closed(Some(NORMAL_CLOSURE), "closed by client");
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => events.message(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => events.message(text),
                    Err(_) => warn!("dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_string()),
                        None => (NO_STATUS, String::new()),
                    };
                    events.closed(Some(code), reason);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    events.error(format!("receive failed: {err}"));
                    events.closed(Some(ABNORMAL_CLOSURE), err.to_string());
                    return;
                }
                None => {
                    events.closed(Some(ABNORMAL_CLOSURE), "stream ended");
                    return;
                }
            },
        }
    }
}

/// Servers that check the credential during the upgrade answer with an HTTP
/// status instead of a close frame; treat those like a policy close.
fn rejection_code(err: &tungstenite::Error) -> Option<u16> {
    match err {
        tungstenite::Error::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            Some(POLICY_VIOLATION)
        }
        _ => None,
    }
}

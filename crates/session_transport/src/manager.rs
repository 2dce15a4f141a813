use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::config::ConnectionConfig;
use crate::envelope::{Envelope, Topic};
use crate::error::TransportError;
use crate::state::{Action, ConnectionMachine, ConnectionStatus, Input};
use crate::transport::{Connector, TransportEvents, TransportLink};

/// How long shutdown waits for the socket to confirm its close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Handle to the connection actor.
///
/// All connection state lives in one spawned task that processes commands,
/// transport events, credential changes and the reconnect timer strictly in
/// arrival order. Inbound envelopes are dispatched to [`EventBus`] handlers
/// from that task.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Input>,
    bus: EventBus,
    status: watch::Receiver<ConnectionStatus>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Spawns the actor. When `credentials` already holds a token, the first
    /// connection attempt starts right away; later changes reconnect.
    pub fn start<C: Connector>(
        config: ConnectionConfig,
        credentials: watch::Receiver<Option<String>>,
        connector: C,
        bus: EventBus,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let (commands, inputs) = mpsc::unbounded_channel();
        let machine = ConnectionMachine::new(config);
        let (status_tx, status) = watch::channel(machine.status());

        let actor = Actor {
            machine,
            connector,
            bus: bus.clone(),
            inputs,
            events_tx: commands.clone(),
            credentials,
            status: status_tx,
            link: None,
            reconnect_at: None,
            shutdown_by: None,
            stopped: false,
        };
        let task = tokio::spawn(actor.run());

        Ok(Self {
            commands,
            bus,
            status,
            task: Some(task),
        })
    }

    fn submit(&self, input: Input) -> Result<(), TransportError> {
        self.commands
            .send(input)
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Sends `{type: kind, data}` now if the connection is ready, otherwise
    /// queues it until the next `global.connected`.
    pub fn send(&self, kind: impl Into<String>, data: Value) -> Result<(), TransportError> {
        self.submit(Input::Send(Envelope::new(kind, data)))
    }

    pub fn send_session(
        &self,
        session_id: &str,
        action: &str,
        data: Value,
    ) -> Result<(), TransportError> {
        self.send(Topic::session(session_id, action).to_string(), data)
    }

    pub fn send_shell(&self, shell_id: &str, action: &str, data: Value) -> Result<(), TransportError> {
        self.send(Topic::shell(shell_id, action).to_string(), data)
    }

    /// Opens a fresh connection with the current credential, replacing any
    /// existing one. A no-op without a credential.
    pub fn connect(&self) -> Result<(), TransportError> {
        self.submit(Input::Connect)
    }

    /// Like [`connect`](Self::connect) but also cancels a pending retry and
    /// resets the attempt counter.
    pub fn reconnect(&self) -> Result<(), TransportError> {
        self.submit(Input::Reconnect)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Closes the connection, clears all bus subscriptions and waits for the
    /// actor to finish. A socket that is still opening is closed once open.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Input::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("connection actor ended abnormally: {err}");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.commands.send(Input::Shutdown);
        }
    }
}

struct Actor<C> {
    machine: ConnectionMachine,
    connector: C,
    bus: EventBus,
    inputs: mpsc::UnboundedReceiver<Input>,
    events_tx: mpsc::UnboundedSender<Input>,
    credentials: watch::Receiver<Option<String>>,
    status: watch::Sender<ConnectionStatus>,
    link: Option<(u64, TransportLink)>,
    reconnect_at: Option<Instant>,
    shutdown_by: Option<Instant>,
    stopped: bool,
}

impl<C: Connector> Actor<C> {
    async fn run(mut self) {
        let initial = self.credentials.borrow_and_update().clone();
        self.dispatch(Input::CredentialChanged(initial));

        let mut credentials_open = true;
        while !self.stopped {
            let deadline = self.reconnect_at;
            let shutdown_by = self.shutdown_by;
            tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(input) => self.dispatch(input),
                    None => break,
                },
                changed = self.credentials.changed(), if credentials_open => match changed {
                    Ok(()) => {
                        let credential = self.credentials.borrow_and_update().clone();
                        self.dispatch(Input::CredentialChanged(credential));
                    }
                    Err(_) => {
                        debug!("credential source dropped; keeping the last credential");
                        credentials_open = false;
                    }
                },
                () = sleep_until(deadline), if deadline.is_some() => {
                    self.reconnect_at = None;
                    self.dispatch(Input::ReconnectTimerFired);
                }
                () = sleep_until(shutdown_by), if shutdown_by.is_some() => {
                    warn!("transport did not confirm close; stopping anyway");
                    break;
                }
            }
        }
        debug!("connection actor stopped");
    }

    fn dispatch(&mut self, input: Input) {
        if input == Input::Shutdown && self.shutdown_by.is_none() {
            self.shutdown_by = Some(Instant::now() + SHUTDOWN_GRACE);
        }
        for action in self.machine.handle(input) {
            self.perform(action);
        }
        let next = self.machine.status();
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::Open {
                generation,
                endpoint,
            } => {
                let events = TransportEvents::new(generation, self.events_tx.clone());
                let link = self.connector.open(&endpoint, events);
                self.link = Some((generation, link));
            }
            Action::Transmit { generation, text } => match &self.link {
                Some((current, link)) if *current == generation => {
                    if !link.send_text(text) {
                        warn!(generation, "transport task is gone; message dropped");
                    }
                }
                _ => warn!(generation, "no transport for outbound message; dropped"),
            },
            Action::Close { generation } => {
                if let Some((current, link)) = &self.link {
                    if *current == generation {
                        link.close();
                        self.link = None;
                    }
                }
            }
            Action::ScheduleReconnect(delay) => self.reconnect_at = Some(Instant::now() + delay),
            Action::CancelReconnect => self.reconnect_at = None,
            Action::Emit { event, data } => {
                self.bus.emit(&event, &data);
            }
            Action::ClearSubscriptions => self.bus.clear(),
            Action::Stopped => self.stopped = true,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::envelope::EVENT_ERROR;
    use crate::state::{ReadyState, TerminalReason, ABNORMAL_CLOSURE, POLICY_VIOLATION};
    use crate::test_support::{connected_frame, fake_connector, FakeLink};
    use crate::transport::Outgoing;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("ws://127.0.0.1:3001/ws")
    }

    async fn wait_for(manager: &ConnectionManager, check: impl Fn(&ConnectionStatus) -> bool) {
        let mut status = manager.watch_status();
        status.wait_for(|s| check(s)).await.expect("actor alive");
    }

    async fn next_link(links: &mut mpsc::UnboundedReceiver<FakeLink>) -> FakeLink {
        links.recv().await.expect("connector opened a link")
    }

    async fn handshake(manager: &ConnectionManager, link: &FakeLink) {
        link.events.opened();
        link.events.message(connected_frame());
        wait_for(manager, |s| s.ready).await;
    }

    #[tokio::test(start_paused = true)]
    async fn queued_sends_flush_in_order_after_handshake() {
        let (connector, mut links) = fake_connector();
        let (_cred_tx, cred_rx) = watch::channel(Some("tok".to_string()));
        let manager = ConnectionManager::start(config(), cred_rx, connector, EventBus::new()).unwrap();

        manager.send_session("s1", "input", json!("a")).unwrap();
        manager.send_session("s1", "input", json!("b")).unwrap();
        manager.send_shell("7", "resize", json!({"cols": 80})).unwrap();

        let mut link = next_link(&mut links).await;
        assert_eq!(link.endpoint, "ws://127.0.0.1:3001/ws?token=tok");
        link.events.opened();
        wait_for(&manager, |s| s.state == ReadyState::Open).await;
        assert!(link.outgoing.try_recv().is_err());

        link.events.message(connected_frame());
        let mut sent = Vec::new();
        for _ in 0..3 {
            match link.outgoing.recv().await {
                Some(Outgoing::Text(text)) => sent.push(text),
                other => panic!("unexpected outgoing {other:?}"),
            }
        }
        assert_eq!(
            sent,
            vec![
                r#"{"type":"session.s1.input","data":"a"}"#,
                r#"{"type":"session.s1.input","data":"b"}"#,
                r#"{"type":"shell.7.resize","data":{"cols":80}}"#,
            ]
        );
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_envelopes_reach_bus_handlers() {
        let (connector, mut links) = fake_connector();
        let (_cred_tx, cred_rx) = watch::channel(Some("tok".to_string()));
        let bus = EventBus::new();
        let mut output = bus.subscribe("session.s1.output");
        let manager = ConnectionManager::start(config(), cred_rx, connector, bus).unwrap();

        let link = next_link(&mut links).await;
        handshake(&manager, &link).await;
        link.events
            .message(r#"{"type":"session.s1.output","data":{"chunk":"hello"}}"#);
        assert_eq!(output.recv().await, Some(json!({"chunk": "hello"})));
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_after_one_second() {
        let (connector, mut links) = fake_connector();
        let (_cred_tx, cred_rx) = watch::channel(Some("tok".to_string()));
        let manager = ConnectionManager::start(config(), cred_rx, connector, EventBus::new()).unwrap();

        let link = next_link(&mut links).await;
        handshake(&manager, &link).await;

        let closed_at = Instant::now();
        link.events.closed(Some(ABNORMAL_CLOSURE), "reset");
        let second = next_link(&mut links).await;
        let waited = closed_at.elapsed();
        assert!(
            waited >= Duration::from_secs(1) && waited < Duration::from_millis(1100),
            "waited {waited:?}"
        );
        assert_eq!(manager.status().attempts, 1);

        handshake(&manager, &second).await;
        assert_eq!(manager.status().attempts, 0);
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn policy_close_emits_terminal_error_and_stays_down() {
        let (connector, mut links) = fake_connector();
        let (_cred_tx, cred_rx) = watch::channel(Some("tok".to_string()));
        let bus = EventBus::new();
        let mut errors = bus.subscribe(EVENT_ERROR);
        let manager = ConnectionManager::start(config(), cred_rx, connector, bus).unwrap();

        let link = next_link(&mut links).await;
        handshake(&manager, &link).await;
        link.events.closed(Some(POLICY_VIOLATION), "token expired");

        let error = errors.recv().await.unwrap();
        assert_eq!(error["kind"], "auth_expired");
        assert_eq!(error["terminal"], true);
        wait_for(&manager, |s| s.terminal == Some(TerminalReason::AuthExpired)).await;

        let retry = time::timeout(Duration::from_secs(60), links.recv()).await;
        assert!(retry.is_err(), "no reconnect after a policy close");
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn credential_rotation_replaces_the_connection() {
        let (connector, mut links) = fake_connector();
        let (cred_tx, cred_rx) = watch::channel(None);
        let manager = ConnectionManager::start(config(), cred_rx, connector, EventBus::new()).unwrap();

        manager.connect().unwrap();
        let idle = time::timeout(Duration::from_secs(5), links.recv()).await;
        assert!(idle.is_err(), "no connection without a credential");

        cred_tx.send_replace(Some("first".to_string()));
        let mut first = next_link(&mut links).await;
        assert!(first.endpoint.ends_with("token=first"));
        handshake(&manager, &first).await;

        cred_tx.send_replace(Some("second".to_string()));
        let second = next_link(&mut links).await;
        assert!(second.endpoint.ends_with("token=second"));
        assert_eq!(first.outgoing.recv().await, Some(Outgoing::Close));

        // The replaced socket's close must not trigger a retry.
        first.events.closed(Some(1000), "replaced");
        handshake(&manager, &second).await;
        let extra = time::timeout(Duration::from_secs(30), links.recv()).await;
        assert!(extra.is_err());
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_clears_subscriptions_and_closes_the_socket() {
        let (connector, mut links) = fake_connector();
        let (_cred_tx, cred_rx) = watch::channel(Some("tok".to_string()));
        let bus = EventBus::new();
        let _output = bus.subscribe("session.s1.output");
        let manager = ConnectionManager::start(config(), cred_rx, connector, bus.clone()).unwrap();

        let mut link = next_link(&mut links).await;
        handshake(&manager, &link).await;

        let events = link.events.clone();
        let closer = tokio::spawn(async move {
            let command = link.outgoing.recv().await;
            events.closed(Some(1000), "bye");
            command
        });
        manager.shutdown().await;

        assert_eq!(closer.await.unwrap(), Some(Outgoing::Close));
        assert_eq!(bus.handler_count("session.s1.output"), 0);
    }
}

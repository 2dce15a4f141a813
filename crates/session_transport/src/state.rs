use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, ReconnectPolicy};
use crate::envelope::{Envelope, EVENT_CONNECTED, EVENT_ERROR};

/// Close code servers use to reject an expired or invalid credential.
pub const POLICY_VIOLATION: u16 = 1008;
/// Reported when a socket drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    AuthExpired,
    RetriesExhausted,
}

/// Snapshot of the connection published after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ReadyState,
    /// True between the server's `global.connected` and the next close.
    pub ready: bool,
    /// Reconnect attempts since the last successful handshake.
    pub attempts: u32,
    /// Set when automatic reconnection has stopped for good.
    pub terminal: Option<TerminalReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Connect,
    Reconnect,
    Send(Envelope),
    CredentialChanged(Option<String>),
    /// Lifecycle event from the transport opened for `generation`.
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    ReconnectTimerFired,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Open { generation: u64, endpoint: String },
    Transmit { generation: u64, text: String },
    Close { generation: u64 },
    ScheduleReconnect(Duration),
    CancelReconnect,
    Emit { event: String, data: Value },
    ClearSubscriptions,
    Stopped,
}

/// Connection lifecycle as a pure state machine: inputs in, actions out, no
/// I/O and no clock.
///
/// Every transport attempt gets a fresh generation. Events tagged with an
/// older generation belong to a socket that was already replaced and are
/// ignored.
#[derive(Debug)]
pub struct ConnectionMachine {
    config: ConnectionConfig,
    policy: ReconnectPolicy,
    credential: Option<String>,
    generation: u64,
    state: ReadyState,
    ready: bool,
    queue: VecDeque<Envelope>,
    attempts: u32,
    reconnect_scheduled: bool,
    self_initiated_close: bool,
    close_when_open: bool,
    shutting_down: bool,
    terminal: Option<TerminalReason>,
}

impl ConnectionMachine {
    pub fn new(config: ConnectionConfig) -> Self {
        let policy = config.reconnect_policy();
        Self {
            config,
            policy,
            credential: None,
            generation: 0,
            state: ReadyState::Closed,
            ready: false,
            queue: VecDeque::new(),
            attempts: 0,
            reconnect_scheduled: false,
            self_initiated_close: false,
            close_when_open: false,
            shutting_down: false,
            terminal: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            ready: self.ready,
            attempts: self.attempts,
            terminal: self.terminal,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        let mut actions = Vec::new();
        match input {
            Input::Connect => {
                if !self.shutting_down {
                    self.connect(&mut actions);
                }
            }
            Input::Reconnect => {
                if !self.shutting_down {
                    self.cancel_reconnect(&mut actions);
                    self.attempts = 0;
                    self.connect(&mut actions);
                }
            }
            Input::Send(envelope) => self.send(envelope, &mut actions),
            Input::CredentialChanged(credential) => {
                self.credential_changed(credential, &mut actions)
            }
            Input::Transport { generation, event } => {
                if generation != self.generation {
                    debug!(
                        generation,
                        current = self.generation,
                        "ignoring event from replaced transport"
                    );
                } else {
                    self.transport_event(event, &mut actions);
                }
            }
            Input::ReconnectTimerFired => {
                if self.reconnect_scheduled && !self.shutting_down {
                    self.reconnect_scheduled = false;
                    self.connect(&mut actions);
                }
            }
            Input::Shutdown => self.shutdown(&mut actions),
        }
        actions
    }

    /// Replaces any current transport with a fresh attempt. Without a
    /// credential this stays idle.
    fn connect(&mut self, actions: &mut Vec<Action>) {
        let Some(token) = self.credential.as_deref() else {
            debug!("no credential available; not connecting");
            return;
        };
        let endpoint = match self.config.endpoint(token) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                self.emit_error(actions, "transport", err.to_string(), true);
                return;
            }
        };

        self.retire_transport(actions);
        self.generation += 1;
        self.state = ReadyState::Connecting;
        self.terminal = None;
        debug!(generation = self.generation, "opening transport");
        actions.push(Action::Open {
            generation: self.generation,
            endpoint,
        });
    }

    /// Detaches from the current transport, if any, asking it to close once it
    /// can. Its later events carry a stale generation.
    fn retire_transport(&mut self, actions: &mut Vec<Action>) {
        if self.state != ReadyState::Closed {
            actions.push(Action::Close {
                generation: self.generation,
            });
            self.generation += 1;
        }
        self.state = ReadyState::Closed;
        self.ready = false;
        self.self_initiated_close = false;
        self.close_when_open = false;
    }

    fn cancel_reconnect(&mut self, actions: &mut Vec<Action>) {
        if self.reconnect_scheduled {
            self.reconnect_scheduled = false;
            actions.push(Action::CancelReconnect);
        }
    }

    fn send(&mut self, envelope: Envelope, actions: &mut Vec<Action>) {
        if !self.ready {
            self.queue.push_back(envelope);
            return;
        }
        if self.state != ReadyState::Open {
            warn!(kind = %envelope.kind, "dropping outbound message; socket is not open");
            return;
        }
        self.transmit(envelope, actions);
    }

    fn transmit(&mut self, envelope: Envelope, actions: &mut Vec<Action>) {
        match envelope.to_json() {
            Ok(text) => actions.push(Action::Transmit {
                generation: self.generation,
                text,
            }),
            Err(err) => warn!(kind = %envelope.kind, "failed to serialize outbound message: {err}"),
        }
    }

    fn credential_changed(&mut self, credential: Option<String>, actions: &mut Vec<Action>) {
        if credential == self.credential {
            return;
        }
        self.credential = credential;
        if self.shutting_down {
            return;
        }
        self.cancel_reconnect(actions);
        self.attempts = 0;
        self.terminal = None;
        if self.credential.is_some() {
            info!("credential changed; reconnecting");
            self.connect(actions);
        } else {
            info!("credential cleared; disconnecting");
            self.retire_transport(actions);
        }
    }

    fn transport_event(&mut self, event: TransportEvent, actions: &mut Vec<Action>) {
        match event {
            TransportEvent::Opened => {
                if self.state != ReadyState::Connecting {
                    return;
                }
                self.state = ReadyState::Open;
                if self.close_when_open {
                    self.close_when_open = false;
                    self.begin_close(actions);
                }
            }
            TransportEvent::Message(text) => self.inbound(text, actions),
            TransportEvent::Error(message) => {
                warn!("transport error: {message}");
                self.emit_error(actions, "transport", message, false);
            }
            TransportEvent::Closed { code, reason } => self.closed(code, reason, actions),
        }
    }

    fn inbound(&mut self, text: String, actions: &mut Vec<Action>) {
        let envelope = match Envelope::from_json(&text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("discarding malformed inbound message: {err}");
                return;
            }
        };
        if envelope.kind != EVENT_CONNECTED {
            actions.push(Action::Emit {
                event: envelope.kind,
                data: envelope.data,
            });
            return;
        }

        info!(generation = self.generation, "connection ready");
        self.ready = true;
        self.attempts = 0;
        self.terminal = None;
        while let Some(queued) = self.queue.pop_front() {
            self.transmit(queued, actions);
        }
    }

    fn closed(&mut self, code: Option<u16>, reason: String, actions: &mut Vec<Action>) {
        self.state = ReadyState::Closed;
        self.ready = false;
        self.close_when_open = false;

        if self.shutting_down {
            actions.push(Action::Stopped);
            return;
        }
        if std::mem::take(&mut self.self_initiated_close) {
            debug!(?code, "transport closed by request");
            return;
        }
        if code == Some(POLICY_VIOLATION) {
            warn!("server rejected the credential; not reconnecting");
            self.terminal = Some(TerminalReason::AuthExpired);
            self.emit_error(
                actions,
                "auth_expired",
                "session credential expired or was rejected; sign in again".to_string(),
                true,
            );
            return;
        }
        if self.attempts < self.policy.max_attempts() {
            let delay = self.policy.delay_for(self.attempts);
            self.attempts += 1;
            self.reconnect_scheduled = true;
            info!(
                ?code,
                reason = %reason,
                attempt = self.attempts,
                delay_ms = delay.as_millis() as u64,
                "connection lost; scheduling reconnect"
            );
            actions.push(Action::ScheduleReconnect(delay));
            return;
        }

        warn!(attempts = self.attempts, "giving up on reconnecting");
        self.terminal = Some(TerminalReason::RetriesExhausted);
        let message = format!("connection lost after {} reconnect attempts", self.attempts);
        self.emit_error(actions, "retries_exhausted", message, true);
    }

    fn begin_close(&mut self, actions: &mut Vec<Action>) {
        self.self_initiated_close = true;
        self.state = ReadyState::Closing;
        actions.push(Action::Close {
            generation: self.generation,
        });
    }

    fn shutdown(&mut self, actions: &mut Vec<Action>) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        self.cancel_reconnect(actions);
        self.queue.clear();
        actions.push(Action::ClearSubscriptions);

        match self.state {
            // A socket still opening is closed as soon as it opens.
            ReadyState::Connecting => self.close_when_open = true,
            ReadyState::Open => self.begin_close(actions),
            ReadyState::Closing => {}
            ReadyState::Closed => actions.push(Action::Stopped),
        }
    }

    fn emit_error(&self, actions: &mut Vec<Action>, kind: &str, message: String, terminal: bool) {
        actions.push(Action::Emit {
            event: EVENT_ERROR.to_string(),
            data: json!({"kind": kind, "message": message, "terminal": terminal}),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new(ConnectionConfig::new("ws://localhost:3001/ws"))
    }

    fn transport(generation: u64, event: TransportEvent) -> Input {
        Input::Transport { generation, event }
    }

    fn closed(code: u16) -> TransportEvent {
        TransportEvent::Closed {
            code: Some(code),
            reason: String::new(),
        }
    }

    fn connected() -> TransportEvent {
        TransportEvent::Message(r#"{"type":"global.connected","data":{}}"#.to_string())
    }

    /// Drives a machine with a credential up to a ready connection.
    fn ready_machine() -> ConnectionMachine {
        let mut m = machine();
        m.handle(Input::CredentialChanged(Some("tok".into())));
        let generation = m.generation();
        m.handle(transport(generation, TransportEvent::Opened));
        m.handle(transport(generation, connected()));
        m
    }

    fn transmitted(actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Transmit { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn no_credential_means_no_connection() {
        let mut m = machine();
        assert!(m.handle(Input::Connect).is_empty());
        assert_eq!(m.status().state, ReadyState::Closed);
    }

    #[test]
    fn credential_opens_with_token_in_endpoint() {
        let mut m = machine();
        let actions = m.handle(Input::CredentialChanged(Some("tok".into())));
        assert_eq!(
            actions,
            vec![Action::Open {
                generation: 1,
                endpoint: "ws://localhost:3001/ws?token=tok".into()
            }]
        );
        assert_eq!(m.status().state, ReadyState::Connecting);
    }

    #[test]
    fn sends_queue_until_handshake_then_flush_in_order() {
        let mut m = machine();
        m.handle(Input::CredentialChanged(Some("tok".into())));
        for n in 0..3 {
            assert!(m
                .handle(Input::Send(Envelope::new("session.s.input", json!(n))))
                .is_empty());
        }
        assert!(m.handle(transport(1, TransportEvent::Opened)).is_empty());
        assert_eq!(m.queued(), 3);

        let actions = m.handle(transport(1, connected()));
        let sent: Vec<Value> = transmitted(&actions)
            .iter()
            .map(|t| serde_json::from_str::<Value>(t).unwrap()["data"].clone())
            .collect();
        assert_eq!(sent, vec![json!(0), json!(1), json!(2)]);
        assert!(m.status().ready);
        assert_eq!(m.queued(), 0);
    }

    #[test]
    fn ready_sends_go_straight_out() {
        let mut m = ready_machine();
        let actions = m.handle(Input::Send(Envelope::new("shell.1.input", json!("ls"))));
        assert_eq!(
            transmitted(&actions),
            vec![r#"{"type":"shell.1.input","data":"ls"}"#.to_string()]
        );
    }

    #[test]
    fn unexpected_closes_back_off_then_give_up() {
        let mut m = ready_machine();
        let mut delays = Vec::new();
        for _ in 0..5 {
            let generation = m.generation();
            let actions = m.handle(transport(generation, closed(ABNORMAL_CLOSURE)));
            match actions.as_slice() {
                [Action::ScheduleReconnect(delay)] => delays.push(delay.as_millis() as u64),
                other => panic!("expected a reconnect, got {other:?}"),
            }
            let reopened = m.handle(Input::ReconnectTimerFired);
            assert!(matches!(reopened.as_slice(), [Action::Open { .. }]));
        }
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);

        let generation = m.generation();
        let actions = m.handle(transport(generation, closed(ABNORMAL_CLOSURE)));
        assert!(matches!(
            actions.as_slice(),
            [Action::Emit { event, data }]
                if event == EVENT_ERROR && data["kind"] == "retries_exhausted" && data["terminal"] == true
        ));
        assert_eq!(m.status().terminal, Some(TerminalReason::RetriesExhausted));
    }

    #[test]
    fn handshake_resets_the_attempt_counter() {
        let mut m = ready_machine();
        m.handle(transport(1, closed(ABNORMAL_CLOSURE)));
        m.handle(Input::ReconnectTimerFired);
        m.handle(transport(2, closed(ABNORMAL_CLOSURE)));
        assert_eq!(m.status().attempts, 2);

        m.handle(Input::ReconnectTimerFired);
        m.handle(transport(3, TransportEvent::Opened));
        m.handle(transport(3, connected()));
        assert_eq!(m.status().attempts, 0);

        let actions = m.handle(transport(3, closed(ABNORMAL_CLOSURE)));
        assert_eq!(
            actions,
            vec![Action::ScheduleReconnect(Duration::from_secs(1))]
        );
    }

    #[test]
    fn policy_violation_never_reconnects() {
        let mut m = ready_machine();
        let actions = m.handle(transport(1, closed(POLICY_VIOLATION)));
        assert!(matches!(
            actions.as_slice(),
            [Action::Emit { data, .. }] if data["kind"] == "auth_expired" && data["terminal"] == true
        ));
        assert!(m.handle(Input::ReconnectTimerFired).is_empty());
        assert_eq!(m.status().terminal, Some(TerminalReason::AuthExpired));
    }

    #[test]
    fn new_credential_recovers_from_auth_expiry() {
        let mut m = ready_machine();
        m.handle(transport(1, closed(POLICY_VIOLATION)));
        let actions = m.handle(Input::CredentialChanged(Some("fresh".into())));
        assert!(matches!(
            actions.as_slice(),
            [Action::Open { endpoint, .. }] if endpoint.ends_with("token=fresh")
        ));
        assert_eq!(m.status().terminal, None);
    }

    #[test]
    fn stale_generation_events_are_ignored() {
        let mut m = ready_machine();
        let actions = m.handle(Input::CredentialChanged(Some("rotated".into())));
        assert_eq!(actions[0], Action::Close { generation: 1 });
        assert!(matches!(actions[1], Action::Open { generation: 3, .. }));

        assert!(m.handle(transport(1, closed(ABNORMAL_CLOSURE))).is_empty());
        assert!(m.handle(transport(1, connected())).is_empty());
        assert_eq!(m.status().state, ReadyState::Connecting);
        assert!(!m.status().ready);
    }

    #[test]
    fn cleared_credential_disconnects_without_reconnecting() {
        let mut m = ready_machine();
        let actions = m.handle(Input::CredentialChanged(None));
        assert_eq!(actions, vec![Action::Close { generation: 1 }]);
        assert_eq!(m.status().state, ReadyState::Closed);
        assert!(m.handle(Input::Connect).is_empty());
    }

    #[test]
    fn manual_reconnect_cancels_the_timer_and_resets_attempts() {
        let mut m = ready_machine();
        m.handle(transport(1, closed(ABNORMAL_CLOSURE)));
        assert_eq!(m.status().attempts, 1);

        let actions = m.handle(Input::Reconnect);
        assert_eq!(actions[0], Action::CancelReconnect);
        assert!(matches!(actions[1], Action::Open { generation: 2, .. }));
        assert_eq!(m.status().attempts, 0);
        assert!(m.handle(Input::ReconnectTimerFired).is_empty());
    }

    #[test]
    fn shutdown_while_connecting_waits_for_open_before_closing() {
        let mut m = machine();
        m.handle(Input::CredentialChanged(Some("tok".into())));
        let actions = m.handle(Input::Shutdown);
        assert_eq!(actions, vec![Action::ClearSubscriptions]);

        let actions = m.handle(transport(1, TransportEvent::Opened));
        assert_eq!(actions, vec![Action::Close { generation: 1 }]);
        assert_eq!(m.status().state, ReadyState::Closing);

        let actions = m.handle(transport(1, closed(1000)));
        assert_eq!(actions, vec![Action::Stopped]);
        assert!(m.handle(Input::Connect).is_empty());
    }

    #[test]
    fn shutdown_when_idle_stops_immediately() {
        let mut m = machine();
        assert_eq!(
            m.handle(Input::Shutdown),
            vec![Action::ClearSubscriptions, Action::Stopped]
        );
        assert!(m.handle(Input::Shutdown).is_empty());
    }

    #[test]
    fn inbound_envelopes_are_emitted_and_garbage_is_dropped() {
        let mut m = ready_machine();
        let actions = m.handle(transport(
            1,
            TransportEvent::Message(r#"{"type":"session.s.output","data":{"chunk":"hi"}}"#.into()),
        ));
        assert_eq!(
            actions,
            vec![Action::Emit {
                event: "session.s.output".into(),
                data: json!({"chunk": "hi"})
            }]
        );
        assert!(m
            .handle(transport(1, TransportEvent::Message("not json".into())))
            .is_empty());
    }

    #[test]
    fn transport_errors_are_reported_but_not_terminal() {
        let mut m = ready_machine();
        let actions = m.handle(transport(1, TransportEvent::Error("reset by peer".into())));
        assert!(matches!(
            actions.as_slice(),
            [Action::Emit { data, .. }] if data["kind"] == "transport" && data["terminal"] == false
        ));
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use session_transport::{
    ConnectionConfig, ConnectionManager, EventBus, TerminalReason, WsConnector, EVENT_ERROR,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(10);

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    (listener, url)
}

#[tokio::test]
async fn queued_input_reaches_server_and_replies_reach_subscribers() {
    let (listener, url) = listener().await;
    let seen_uri = Arc::new(Mutex::new(String::new()));

    let server_uri = Arc::clone(&seen_uri);
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let record_uri = |request: &Request, response: Response| {
            *server_uri.lock().unwrap() = request.uri().to_string();
            Ok::<_, ErrorResponse>(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, record_uri)
            .await
            .unwrap();
        ws.send(Message::Text(
            r#"{"type":"global.connected","data":{}}"#.into(),
        ))
        .await
        .unwrap();

        let inbound = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break text.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("client went away: {other:?}"),
            }
        };
        let request: Value = serde_json::from_str(&inbound).unwrap();
        assert_eq!(request["type"], "session.s1.input");
        let reply = json!({"type": "session.s1.output", "data": {"echo": request["data"]}});
        ws.send(Message::Text(reply.to_string().into())).await.unwrap();

        while let Some(Ok(frame)) = ws.next().await {
            if frame.is_close() {
                break;
            }
        }
    });

    let (_credentials, cred_rx) = watch::channel(Some("secret".to_string()));
    let bus = EventBus::new();
    let mut output = bus.subscribe("session.s1.output");
    let manager =
        ConnectionManager::start(ConnectionConfig::new(url), cred_rx, WsConnector, bus).unwrap();
    manager
        .send_session("s1", "input", json!({"text": "ls\n"}))
        .unwrap();

    let reply = timeout(WAIT, output.recv()).await.unwrap();
    assert_eq!(reply, Some(json!({"echo": {"text": "ls\n"}})));
    assert_eq!(seen_uri.lock().unwrap().as_str(), "/ws?token=secret");

    timeout(WAIT, manager.shutdown()).await.unwrap();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn rejected_upgrade_is_reported_as_expired_credential() {
    let (listener, url) = listener().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let reject = |_: &Request, _: Response| {
            Err::<Response, _>(
                http::Response::builder()
                    .status(401)
                    .body(Some("expired".to_string()))
                    .unwrap(),
            )
        };
        let _ = tokio_tungstenite::accept_hdr_async(stream, reject).await;
    });

    let (_credentials, cred_rx) = watch::channel(Some("stale".to_string()));
    let bus = EventBus::new();
    let mut errors = bus.subscribe(EVENT_ERROR);
    let manager =
        ConnectionManager::start(ConnectionConfig::new(url), cred_rx, WsConnector, bus).unwrap();

    let mut terminal = None;
    while let Some(error) = timeout(WAIT, errors.recv()).await.unwrap() {
        if error["terminal"] == true {
            terminal = Some(error);
            break;
        }
    }
    let terminal = terminal.expect("terminal error");
    assert_eq!(terminal["kind"], "auth_expired");

    let mut status = manager.watch_status();
    timeout(
        WAIT,
        status.wait_for(|s| s.terminal == Some(TerminalReason::AuthExpired)),
    )
    .await
    .unwrap()
    .unwrap();
    timeout(WAIT, manager.shutdown()).await.unwrap();
}

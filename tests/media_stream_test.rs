//! Media stream WebSocket integration tests, against a real listener

mod common;

use common::{spawn_server, test_app, TestApp};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use voxbridge::application::call::CallNotification;
use voxbridge::domain::shared::value_objects::CallSid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn bootstrap(app: &TestApp, call_sid: &str) {
    app.calls
        .bootstrap(CallNotification {
            call_sid: Some(call_sid.to_string()),
            from: Some("+15550001111".to_string()),
            to: Some("+16025550100".to_string()),
            direction: Some("inbound".to_string()),
            request_host: Some(common::PUBLIC_HOST.to_string()),
        })
        .await
        .unwrap();
}

async fn connect(addr: SocketAddr) -> Client {
    let (socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    socket
}

async fn send_json(socket: &mut Client, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

async fn start(socket: &mut Client, call_sid: &str, stream_sid: &str) {
    send_json(socket, json!({"event": "connected", "protocol": "Call", "version": "1.0.0"})).await;
    send_json(
        socket,
        json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": stream_sid,
            "start": {
                "accountSid": "AC123",
                "streamSid": stream_sid,
                "callSid": call_sid,
                "tracks": ["inbound"],
                "customParameters": {"call_sid": call_sid, "agent": "receptionist"},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            }
        }),
    )
    .await;
}

async fn send_media(socket: &mut Client, stream_sid: &str, chunk: u32, payload: &str) {
    send_json(
        socket,
        json!({
            "event": "media",
            "sequenceNumber": (chunk + 2).to_string(),
            "streamSid": stream_sid,
            "media": {"track": "inbound", "chunk": chunk.to_string(), "timestamp": "20", "payload": payload}
        }),
    )
    .await;
}

/// Next text frame as JSON; `None` once the server closes
async fn next_json(socket: &mut Client) -> Option<Value> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame within 5s")?;
        match message {
            Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn phase(app: &TestApp, call_sid: &str) -> String {
    app.calls
        .get_call(&CallSid::parse(call_sid).unwrap())
        .await
        .map(|view| view.phase)
        .unwrap_or_default()
}

/// Poll until the call reaches `expected`
async fn wait_for_phase(app: &TestApp, call_sid: &str, expected: &str) {
    for _ in 0..100 {
        if phase(app, call_sid).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("call {} never reached {}", call_sid, expected);
}

#[tokio::test]
async fn test_stream_attaches_and_echoes_audio() {
    let app = test_app();
    bootstrap(&app, "CA1").await;
    let addr = spawn_server(app.router.clone()).await;

    let mut socket = connect(addr).await;
    start(&mut socket, "CA1", "MZ1").await;
    wait_for_phase(&app, "CA1", "active").await;

    // "AAEC" = [0, 1, 2]
    send_media(&mut socket, "MZ1", 1, "AAEC").await;
    let echoed = next_json(&mut socket).await.unwrap();
    assert_eq!(echoed["event"], "media");
    assert_eq!(echoed["streamSid"], "MZ1");
    assert_eq!(echoed["media"]["payload"], "AAEC");

    send_json(
        &mut socket,
        json!({"event": "dtmf", "streamSid": "MZ1", "dtmf": {"track": "inbound_track", "digit": "5"}}),
    )
    .await;
    let mark = next_json(&mut socket).await.unwrap();
    assert_eq!(mark["event"], "mark");
    assert_eq!(mark["mark"]["name"], "dtmf-5");

    send_json(&mut socket, json!({"event": "stop", "streamSid": "MZ1"})).await;
    wait_for_phase(&app, "CA1", "ended").await;

    let view = app
        .calls
        .get_call(&CallSid::parse("CA1").unwrap())
        .await
        .unwrap();
    assert_eq!(view.end_reason.as_deref(), Some("stream_closed"));
    assert!(app.provider.hangups().is_empty());
}

#[tokio::test]
async fn test_unknown_call_socket_is_closed() {
    let app = test_app();
    let addr = spawn_server(app.router.clone()).await;

    let mut socket = connect(addr).await;
    start(&mut socket, "CA404", "MZ1").await;

    assert!(next_json(&mut socket).await.is_none());
    assert_eq!(app.calls.session_count().await, 0);
}

#[tokio::test]
async fn test_second_stream_rejected_first_keeps_flowing() {
    let app = test_app();
    bootstrap(&app, "CA2").await;
    let addr = spawn_server(app.router.clone()).await;

    let mut first = connect(addr).await;
    start(&mut first, "CA2", "MZ1").await;
    wait_for_phase(&app, "CA2", "active").await;

    let mut second = connect(addr).await;
    start(&mut second, "CA2", "MZ2").await;
    assert!(next_json(&mut second).await.is_none());

    // The first stream is untouched
    send_media(&mut first, "MZ1", 1, "AAEC").await;
    let echoed = next_json(&mut first).await.unwrap();
    assert_eq!(echoed["streamSid"], "MZ1");

    let view = app
        .calls
        .get_call(&CallSid::parse("CA2").unwrap())
        .await
        .unwrap();
    assert_eq!(view.phase, "active");
    assert_eq!(view.stream_sid.unwrap().as_str(), "MZ1");
}

#[tokio::test]
async fn test_concurrent_streams_for_one_call_attach_once() {
    let app = test_app();
    bootstrap(&app, "CA5").await;
    let addr = spawn_server(app.router.clone()).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    tokio::join!(
        start(&mut first, "CA5", "MZ1"),
        start(&mut second, "CA5", "MZ2")
    );
    wait_for_phase(&app, "CA5", "active").await;

    let view = app
        .calls
        .get_call(&CallSid::parse("CA5").unwrap())
        .await
        .unwrap();
    let winner_sid = view.stream_sid.unwrap().as_str().to_string();
    let (mut winner, mut loser) = if winner_sid == "MZ1" {
        (first, second)
    } else {
        (second, first)
    };

    assert!(next_json(&mut loser).await.is_none());

    send_media(&mut winner, &winner_sid, 1, "AAEC").await;
    let echoed = next_json(&mut winner).await.unwrap();
    assert_eq!(echoed["streamSid"], winner_sid.as_str());
    assert_eq!(phase(&app, "CA5").await, "active");
}

#[tokio::test]
async fn test_hangup_closes_stream() {
    let app = test_app();
    bootstrap(&app, "CA3").await;
    let addr = spawn_server(app.router.clone()).await;

    let mut socket = connect(addr).await;
    start(&mut socket, "CA3", "MZ1").await;
    wait_for_phase(&app, "CA3", "active").await;

    let outcome = app
        .calls
        .handle_status(&CallSid::parse("CA3").unwrap(), "completed")
        .await;
    assert_eq!(outcome, voxbridge::application::call::StatusOutcome::Ended);

    // Server closes its side once the forwarding loop sees the hangup
    assert!(next_json(&mut socket).await.is_none());

    let view = app
        .calls
        .get_call(&CallSid::parse("CA3").unwrap())
        .await
        .unwrap();
    assert_eq!(view.end_reason.as_deref(), Some("hangup"));
    assert!(app.provider.hangups().is_empty());
}

#[tokio::test]
async fn test_garbled_start_closes_socket() {
    let app = test_app();
    bootstrap(&app, "CA4").await;
    let addr = spawn_server(app.router.clone()).await;

    let mut socket = connect(addr).await;
    socket
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();

    assert!(next_json(&mut socket).await.is_none());
    assert_eq!(phase(&app, "CA4").await, "bootstrapped");
}

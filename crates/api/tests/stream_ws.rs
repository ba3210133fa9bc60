//! End-to-end tests for the live frame WebSocket.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{token, TestApp, ONE_FRAME, SLEEPER};
use framewatch_core::job::{JobKind, JobState, NewJob, SourceDescriptor};
use framewatch_core::processor::ProcessorConfig;
use framewatch_core::types::DbId;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn live_job(app: &TestApp, name: &str) -> DbId {
    app.state
        .controller
        .register(NewJob {
            name: name.into(),
            kind: JobKind::LivePreview,
            source: Some(SourceDescriptor::Stream {
                uri: "rtsp://camera.local/1".into(),
            }),
            processor: ProcessorConfig::Passthrough,
            parent_id: None,
        })
        .await
        .unwrap()
        .id
}

async fn running_job(app: &TestApp, name: &str) -> DbId {
    let id = live_job(app, name).await;
    app.state.controller.start(id).await.unwrap();
    assert_eq!(app.wait_for_state(id, JobState::Running).await, JobState::Running);
    id
}

async fn connect(addr: SocketAddr, id: DbId, first: &str) -> Client {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/jobs/{id}")).await.unwrap();
    ws.send(Message::Text(first.to_string())).await.unwrap();
    ws
}

/// Next data or close message, skipping pings.
async fn next_message(ws: &mut Client) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("websocket error");
        if !matches!(msg, Message::Ping(_) | Message::Pong(_)) {
            return msg;
        }
    }
}

fn close_code(msg: &Message) -> Option<u16> {
    match msg {
        Message::Close(Some(frame)) => Some(u16::from(frame.code)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bad_token_closes_with_4001() {
    let app = TestApp::with_script(SLEEPER);
    let addr = serve(&app).await;
    let id = running_job(&app, "gate").await;

    let mut ws = connect(addr, id, r#"{"token": "forged"}"#).await;
    assert_eq!(close_code(&next_message(&mut ws).await), Some(4001));

    app.state.supervisor().shutdown().await;
}

#[tokio::test]
async fn job_not_running_closes_with_4004() {
    let app = TestApp::with_script(SLEEPER);
    let addr = serve(&app).await;
    let id = live_job(&app, "gate").await;

    let mut ws = connect(addr, id, &token()).await;
    assert_eq!(close_code(&next_message(&mut ws).await), Some(4004));

    let mut ws = connect(addr, 999, &token()).await;
    assert_eq!(close_code(&next_message(&mut ws).await), Some(4004));
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn frames_stream_until_job_stops() {
    let app = TestApp::with_script(ONE_FRAME);
    let addr = serve(&app).await;
    let id = running_job(&app, "gate").await;

    let token = serde_json::json!({ "token": token() }).to_string();
    let mut ws = connect(addr, id, &token).await;
    assert_eq!(next_message(&mut ws).await, Message::Binary(b"hi".to_vec()));

    app.state.controller.stop(id).await.unwrap();
    assert_eq!(close_code(&next_message(&mut ws).await), Some(4004));
}

#[tokio::test]
async fn disconnect_releases_live_job() {
    let app = TestApp::with_script(ONE_FRAME);
    let addr = serve(&app).await;
    let id = running_job(&app, "gate").await;

    let mut ws = connect(addr, id, &token()).await;
    assert_eq!(next_message(&mut ws).await, Message::Binary(b"hi".to_vec()));

    ws.close(None).await.unwrap();
    drop(ws);

    assert_eq!(app.wait_for_state(id, JobState::Stopped).await, JobState::Stopped);
    // The worker is reaped after the stop is recorded.
    assert!(app.wait_for_deregistered(id).await);
}

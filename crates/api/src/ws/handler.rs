use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use framewatch_core::job::JobState;
use framewatch_core::types::DbId;
use framewatch_pipeline::relay::{run_relay, FrameSink, RelayConfig, RelayExit, CLOSE_JOB_UNAVAILABLE};
use futures::stream::SplitStream;
use futures::StreamExt;
use serde::Deserialize;

use crate::auth::jwt::validate_token;
use crate::state::AppState;
use crate::ws::sink::WsFrameSink;

/// Missing, malformed or invalid token.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// The server is shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// First client message when sent as JSON.
#[derive(Deserialize)]
struct TokenMessage {
    token: String,
}

/// GET /ws/jobs/{id} -- upgrade to a live frame stream.
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<DbId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, job_id, state))
}

/// Drive one stream connection:
///
/// 1. Authenticate with the first message (bounded wait).
/// 2. Check the job is Running and attach to its frame channel.
/// 3. Relay frames until the channel, the stream or the client goes away.
/// 4. Detach and let the lifecycle controller release the job.
async fn handle_stream(socket: WebSocket, job_id: DbId, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (sender, mut receiver) = socket.split();
    let mut sink = WsFrameSink::new(sender);

    let auth_timeout = Duration::from_secs(state.config.ws_auth_timeout_secs);
    let token = tokio::time::timeout(auth_timeout, read_token(&mut receiver))
        .await
        .ok()
        .flatten();
    let claims = match token.map(|t| validate_token(&t, &state.config.jwt)) {
        Some(Ok(claims)) => claims,
        _ => {
            tracing::info!(conn_id = %conn_id, job_id, "Stream rejected: unauthorized");
            let _ = sink.close(CLOSE_UNAUTHORIZED, "unauthorized").await;
            return;
        }
    };

    let running = matches!(
        state.controller.get(job_id).await,
        Ok(job) if job.state == JobState::Running
    );
    let channel = if running {
        state.supervisor().channel(job_id).await
    } else {
        None
    };
    let Some(channel) = channel else {
        tracing::info!(conn_id = %conn_id, job_id, "Stream rejected: job not running");
        let _ = sink.close(CLOSE_JOB_UNAVAILABLE, "job not running").await;
        return;
    };

    let subscription = channel.subscribe();
    tracing::info!(
        conn_id = %conn_id,
        job_id,
        user_id = claims.sub,
        subscribers = channel.subscriber_count(),
        "Stream attached",
    );

    // Client-side close (or server shutdown) cancels the relay.
    let cancel = state.shutdown.child_token();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            while let Some(msg) = receiver.next().await {
                match msg {
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            cancel.cancel();
        }
    });

    let config = RelayConfig {
        dequeue_timeout: state.supervisor().config().relay_dequeue_timeout,
        ..RelayConfig::default()
    };
    let exit = run_relay(subscription.channel(), &mut sink, &cancel, &config).await;

    if exit == RelayExit::ConnectionClosed && state.shutdown.is_cancelled() {
        let _ = sink.close(CLOSE_GOING_AWAY, "server shutting down").await;
    }
    watcher.abort();
    drop(subscription);

    tracing::info!(conn_id = %conn_id, job_id, ?exit, "Stream detached");

    match state.controller.release(job_id).await {
        Ok(Some(job)) => tracing::info!(job_id, state = ?job.state, "Released unwatched job"),
        Ok(None) => {}
        Err(e) => tracing::warn!(job_id, error = %e, "Failed to release job after stream"),
    }
}

/// Wait for the client's token message.
///
/// Accepts `{"token": "..."}` or the bare token as text. Control frames are
/// skipped; anything else is treated as a failed handshake.
async fn read_token(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => return parse_token(text.as_str()),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            _ => return None,
        }
    }
    None
}

fn parse_token(text: &str) -> Option<String> {
    let text = text.trim();
    let token = if text.starts_with('{') {
        serde_json::from_str::<TokenMessage>(text).ok()?.token
    } else {
        text.to_string()
    };
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_accepted_as_json_or_bare_text() {
        assert_eq!(parse_token(r#"{"token": "abc"}"#).as_deref(), Some("abc"));
        assert_eq!(parse_token("  abc\n").as_deref(), Some("abc"));
    }

    #[test]
    fn malformed_or_empty_token_is_rejected() {
        assert_eq!(parse_token(r#"{"jwt": "abc"}"#), None);
        assert_eq!(parse_token(r#"{"token": ""}"#), None);
        assert_eq!(parse_token("   "), None);
    }
}

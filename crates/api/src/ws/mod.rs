//! Live frame streaming over WebSocket.
//!
//! `GET /ws/jobs/{id}` upgrades to a WebSocket. The client authenticates
//! with its first message, then receives one binary message per frame
//! until the job stops, the stream ends or the client leaves.

mod handler;
mod sink;

pub use handler::{stream_handler, CLOSE_GOING_AWAY, CLOSE_UNAUTHORIZED};
pub use sink::WsFrameSink;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Mount WebSocket routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/ws/jobs/{id}", get(stream_handler))
}

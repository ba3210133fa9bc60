//! Per-subscriber frame relay.
//!
//! A relay drains a job's [`FrameChannel`] and forwards each message to one
//! live connection through a [`FrameSink`]. It never owns the worker or the
//! channel: it only reads until the channel goes away, the stream ends, or
//! the connection does.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use framewatch_core::channel::{Dequeued, FrameChannel};
use framewatch_core::frame::FrameMessage;
use tokio_util::sync::CancellationToken;

/// Normal closure after a finite stream ended.
pub const CLOSE_NORMAL: u16 = 1000;
/// The job is not running, or stopped while streaming.
pub const CLOSE_JOB_UNAVAILABLE: u16 = 4004;

/// Wait after an empty dequeue before trying again.
pub const RELAY_BACKOFF: Duration = Duration::from_millis(10);

/// One outbound message on a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Raw encoded frame.
    Binary(Bytes),
    /// JSON text, used for processing errors.
    Text(String),
}

#[derive(Debug, thiserror::Error)]
#[error("connection send failed: {0}")]
pub struct SinkError(pub String);

/// A live connection a relay writes to.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Outbound) -> Result<(), SinkError>;

    /// Close the connection with a status code.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SinkError>;
}

/// Why a relay loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The channel was removed (job stopped or finished).
    ChannelGone,
    /// The worker reported the end of a finite source.
    EndOfStream,
    /// The connection went away (cancellation).
    ConnectionClosed,
    /// Writing to the connection failed.
    SendFailed,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub dequeue_timeout: Duration,
    pub backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_millis(100),
            backoff: RELAY_BACKOFF,
        }
    }
}

/// Forward messages from `channel` to `sink` until one side goes away.
///
/// `cancel` is triggered by the caller when the connection is closed from
/// the client side.
pub async fn run_relay<S: FrameSink>(
    channel: &FrameChannel,
    sink: &mut S,
    cancel: &CancellationToken,
    config: &RelayConfig,
) -> RelayExit {
    let mut forwarded = 0u64;

    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayExit::ConnectionClosed,
            next = channel.dequeue(config.dequeue_timeout) => next,
        };

        match next {
            Dequeued::Message(FrameMessage::Image { payload, .. }) => {
                if sink.send_frame(Outbound::Binary(payload)).await.is_err() {
                    break RelayExit::SendFailed;
                }
                forwarded += 1;
            }
            Dequeued::Message(FrameMessage::ProcessingError { reason }) => {
                let text = serde_json::json!({ "error": reason }).to_string();
                if sink.send_frame(Outbound::Text(text)).await.is_err() {
                    break RelayExit::SendFailed;
                }
            }
            Dequeued::Message(FrameMessage::EndOfStream) => {
                let _ = sink.close(CLOSE_NORMAL, "end of stream").await;
                break RelayExit::EndOfStream;
            }
            Dequeued::Empty => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break RelayExit::ConnectionClosed,
                    _ = tokio::time::sleep(config.backoff) => {}
                }
            }
            Dequeued::Gone => {
                let _ = sink.close(CLOSE_JOB_UNAVAILABLE, "job stopped").await;
                break RelayExit::ChannelGone;
            }
        }
    };

    tracing::debug!(?exit, forwarded, "Relay finished");
    exit
}

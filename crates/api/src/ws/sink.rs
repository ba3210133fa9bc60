use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use framewatch_pipeline::relay::{FrameSink, Outbound, SinkError};
use futures::stream::SplitSink;
use futures::SinkExt;

/// Outbound half of a WebSocket as a relay target.
pub struct WsFrameSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WsFrameSink {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&mut self, frame: Outbound) -> Result<(), SinkError> {
        let msg = match frame {
            Outbound::Binary(bytes) => Message::Binary(bytes),
            Outbound::Text(text) => Message::Text(text.into()),
        };
        self.inner
            .send(msg)
            .await
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SinkError> {
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        self.inner
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| SinkError(e.to_string()))?;
        self.inner.close().await.map_err(|e| SinkError(e.to_string()))
    }
}

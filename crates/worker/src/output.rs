//! Streams frames from the worker's local channel to the supervisor.

use std::sync::Arc;
use std::time::Duration;

use framewatch_core::channel::{Dequeued, FrameChannel};
use framewatch_core::codec::{FrameCodec, FrameCodecError};
use framewatch_core::frame::FrameMessage;
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;

const POLL: Duration = Duration::from_millis(100);

/// Drain `channel` into `writer` until an end-of-stream message has been
/// written or the channel is closed. Resolves to the number of messages
/// written.
pub fn spawn_stdout_writer<W>(
    channel: Arc<FrameChannel>,
    writer: W,
) -> JoinHandle<Result<u64, FrameCodecError>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut out = FramedWrite::new(writer, FrameCodec::new());
        let mut written = 0u64;

        loop {
            match channel.dequeue(POLL).await {
                Dequeued::Message(msg) => {
                    let last = matches!(msg, FrameMessage::EndOfStream);
                    out.send(msg).await?;
                    written += 1;
                    if last {
                        break;
                    }
                }
                Dequeued::Empty => continue,
                Dequeued::Gone => break,
            }
        }

        out.flush().await?;
        Ok(written)
    })
}

//! Compact progress log (`process.log`).
//!
//! Entries are handed to a background writer task through a small bounded
//! queue. Recording never waits: when the queue is full the entry is
//! dropped, so a slow disk cannot stall the capture loop.

use std::io;
use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Entries that may wait for the writer task.
const QUEUE_CAPACITY: usize = 256;

pub struct ProgressLog {
    tx: mpsc::Sender<String>,
    writer: JoinHandle<io::Result<()>>,
    dropped: u64,
}

impl ProgressLog {
    /// Open `path` for appending and start the writer task.
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let (tx, mut rx) = mpsc::channel::<String>(QUEUE_CAPACITY);

        let writer = tokio::spawn(async move {
            let mut out = BufWriter::new(file);
            while let Some(line) = rx.recv().await {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                if rx.is_empty() {
                    out.flush().await?;
                }
            }
            out.flush().await
        });

        Ok(Self {
            tx,
            writer,
            dropped: 0,
        })
    }

    /// Queue one line, prefixed with the current UTC time.
    pub fn record(&mut self, message: impl AsRef<str>) {
        let line = format!(
            "{} {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            message.as_ref()
        );
        if self.tx.try_send(line).is_err() {
            self.dropped += 1;
        }
    }

    /// Entries dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Write out everything queued and close the file.
    pub async fn close(self) -> io::Result<()> {
        drop(self.tx);
        match self.writer.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

//! The worker run loop.
//!
//! A run opens its source, then repeatedly reads a frame, processes it and
//! publishes the result on a local [`FrameChannel`] that is streamed to the
//! supervisor over stdout. Offline runs also persist artifacts.
//!
//! Termination:
//!
//! | Cause                               | Result                         |
//! |-------------------------------------|--------------------------------|
//! | Finite source exhausted             | `Ok`, end-of-stream published  |
//! | Shutdown requested                  | `Ok`, no end-of-stream         |
//! | Source cannot be opened             | `SourceUnavailable`            |
//! | Finite source read fails            | `SourceRead`                   |
//! | Processing fails (offline)          | `Processor`                    |
//! | Live source cannot be reopened      | `ReconnectExhausted`           |
//!
//! Every failure is written to the completion marker before returning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use framewatch_core::backoff::Backoff;
use framewatch_core::channel::{EnqueueOutcome, FrameChannel};
use framewatch_core::codec::FrameCodecError;
use framewatch_core::frame::FrameMessage;
use framewatch_core::layout::ArtifactLayout;
use framewatch_core::processor::FrameProcessor;
use framewatch_core::types::DbId;
use framewatch_core::worker_spec::WorkerSpec;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactWriter;
use crate::error::WorkerError;
use crate::output::spawn_stdout_writer;
use crate::progress::ProgressLog;
use crate::source::{FrameSource, SourceError, SourceOpener};

/// Upper bound on publishing end-of-stream and flushing it out.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on flushing pending frames of a stopped or failed run.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Counters reported when a run ends without error.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Frames read from the source.
    pub frames: u64,
    /// Frames accepted by the output channel.
    pub published: u64,
    /// Frames the output channel had no room for.
    pub dropped: u64,
    /// Live frames skipped because processing failed.
    pub processing_errors: u64,
    /// Successful reopens of a live source.
    pub reconnects: u32,
    /// Whether the source was fully consumed (as opposed to stopped).
    pub end_of_stream: bool,
}

pub struct Worker {
    spec: WorkerSpec,
    processor: Arc<dyn FrameProcessor>,
    opener: Arc<dyn SourceOpener>,
    marker_path: PathBuf,
}

impl Worker {
    pub fn new(
        spec: WorkerSpec,
        processor: Arc<dyn FrameProcessor>,
        opener: Arc<dyn SourceOpener>,
    ) -> Self {
        let marker_path = ArtifactLayout::from_job_dir(&spec.output_dir).marker_path();
        Self {
            spec,
            processor,
            opener,
            marker_path,
        }
    }

    /// Write the completion marker somewhere other than the job directory.
    pub fn with_marker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.marker_path = path.into();
        self
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// Run to completion, streaming frames to `out`.
    pub async fn run<W>(self, out: W, shutdown: CancellationToken) -> Result<RunSummary, WorkerError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let job_id = self.spec.job_id;
        let result = self.execute(out, &shutdown).await;

        match &result {
            Ok(summary) => tracing::info!(
                job_id,
                frames = summary.frames,
                dropped = summary.dropped,
                processing_errors = summary.processing_errors,
                end_of_stream = summary.end_of_stream,
                "Worker run finished",
            ),
            Err(e) => {
                tracing::error!(job_id, kind = ?e.failure_kind(), error = %e, "Worker run failed");
                if let Err(marker_err) = e.to_marker(job_id).write(&self.marker_path) {
                    tracing::error!(job_id, error = %marker_err, "Failed to write completion marker");
                }
            }
        }
        result
    }

    async fn execute<W>(&self, out: W, shutdown: &CancellationToken) -> Result<RunSummary, WorkerError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let layout = ArtifactLayout::from_job_dir(&self.spec.output_dir);
        tokio::fs::create_dir_all(layout.job_dir()).await?;

        let channel = Arc::new(FrameChannel::new(self.spec.channel_capacity.max(1)));
        let writer = spawn_stdout_writer(Arc::clone(&channel), out);

        let mut progress = ProgressLog::open(&layout.log_path()).await?;
        progress.record(format!(
            "start job={} kind={} source={}",
            self.spec.job_id,
            self.spec.kind,
            self.spec.source.location()
        ));

        let result = self.capture(&layout, &channel, &mut progress, shutdown).await;

        match &result {
            Ok(summary) => progress.record(format!(
                "end frames={} dropped={} processing_errors={} reconnects={} end_of_stream={}",
                summary.frames,
                summary.dropped,
                summary.processing_errors,
                summary.reconnects,
                summary.end_of_stream
            )),
            Err(e) => progress.record(format!("failed {e}")),
        }

        let end_of_stream = matches!(&result, Ok(summary) if summary.end_of_stream);
        drain(self.spec.job_id, &channel, writer, end_of_stream).await;

        if let Err(e) = progress.close().await {
            tracing::warn!(job_id = self.spec.job_id, error = %e, "Failed to write progress log");
        }
        result
    }

    async fn capture(
        &self,
        layout: &ArtifactLayout,
        channel: &FrameChannel,
        progress: &mut ProgressLog,
        shutdown: &CancellationToken,
    ) -> Result<RunSummary, WorkerError> {
        let source = self
            .opener
            .open(&self.spec.source)
            .await
            .map_err(|e| WorkerError::SourceUnavailable(e.to_string()))?;

        let mut artifacts = if self.spec.persists_artifacts() {
            Some(ArtifactWriter::create(layout.clone(), self.spec.keyframe_interval).await?)
        } else {
            None
        };

        let mut summary = RunSummary::default();
        let result = self
            .pump(source, channel, progress, &mut artifacts, &mut summary, shutdown)
            .await;

        // Keep whatever was written, even for a failed run.
        if let Some(artifacts) = artifacts.as_mut() {
            match artifacts.finish().await {
                Ok(()) => {}
                Err(e) if result.is_ok() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(job_id = self.spec.job_id, error = %e, "Failed to flush artifacts")
                }
            }
        }
        result.map(|()| summary)
    }

    async fn pump(
        &self,
        mut source: Box<dyn FrameSource>,
        channel: &FrameChannel,
        progress: &mut ProgressLog,
        artifacts: &mut Option<ArtifactWriter>,
        summary: &mut RunSummary,
        shutdown: &CancellationToken,
    ) -> Result<(), WorkerError> {
        let job_id = self.spec.job_id;
        let live = self.spec.kind.is_live();
        let log_interval = self.spec.log_interval.max(1);
        let enqueue_timeout = self.spec.enqueue_timeout();
        let mut backoff = Backoff::new(self.spec.reconnect.clone());

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(job_id, "Shutdown requested, stopping capture");
                    return Ok(());
                }
                next = source.next_frame() => next,
            };

            let image = match next {
                Ok(Some(image)) => {
                    backoff.reset();
                    image
                }
                Ok(None) if !live => {
                    summary.end_of_stream = true;
                    return Ok(());
                }
                Ok(None) => {
                    drop(source);
                    let lost = format!("{} ended", self.spec.source.location());
                    match self.reconnect(&mut backoff, lost, shutdown).await? {
                        Some(reopened) => source = reopened,
                        None => return Ok(()),
                    }
                    summary.reconnects += 1;
                    continue;
                }
                Err(SourceError::Read(msg)) if live => {
                    drop(source);
                    match self.reconnect(&mut backoff, msg, shutdown).await? {
                        Some(reopened) => source = reopened,
                        None => return Ok(()),
                    }
                    summary.reconnects += 1;
                    continue;
                }
                Err(e) => return Err(WorkerError::SourceRead(e.to_string())),
            };

            let index = summary.frames;
            summary.frames += 1;

            let processed = match self.processor.process(image).await {
                Ok(processed) => processed,
                Err(e) if live => {
                    tracing::warn!(job_id, frame = index, error = %e, "Frame processing failed, skipping");
                    summary.processing_errors += 1;
                    let msg = FrameMessage::ProcessingError {
                        reason: e.to_string(),
                    };
                    channel.enqueue(msg, enqueue_timeout).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(artifacts) = artifacts.as_mut() {
                artifacts.write_frame(index, &processed.image).await?;
            }

            match channel
                .enqueue(FrameMessage::image(index, processed.image), enqueue_timeout)
                .await
            {
                EnqueueOutcome::Enqueued => summary.published += 1,
                EnqueueOutcome::Dropped => summary.dropped += 1,
            }

            if index % log_interval == 0 {
                progress.record(format!(
                    "frame={index} detections={} dropped={}",
                    processed.detections, summary.dropped
                ));
            }
        }
    }

    /// Reopen a live source with backoff.
    ///
    /// `Ok(None)` means shutdown was requested while waiting.
    async fn reconnect(
        &self,
        backoff: &mut Backoff,
        mut last_error: String,
        shutdown: &CancellationToken,
    ) -> Result<Option<Box<dyn FrameSource>>, WorkerError> {
        let job_id = self.spec.job_id;
        loop {
            let Some(delay) = backoff.next_attempt() else {
                return Err(WorkerError::ReconnectExhausted {
                    attempts: backoff.attempts(),
                    last_error,
                });
            };
            tracing::warn!(
                job_id,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Live source lost, reconnecting",
            );

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }

            match self.opener.open(&self.spec.source).await {
                Ok(source) => {
                    tracing::info!(job_id, attempt = backoff.attempts(), "Live source reopened");
                    return Ok(Some(source));
                }
                Err(e) => last_error = e.to_string(),
            }
        }
    }
}

/// Let the stdout writer flush what is pending, then stop it.
async fn drain(
    job_id: DbId,
    channel: &FrameChannel,
    writer: JoinHandle<Result<u64, FrameCodecError>>,
    end_of_stream: bool,
) {
    if end_of_stream {
        if channel.enqueue(FrameMessage::EndOfStream, DRAIN_TIMEOUT).await == EnqueueOutcome::Dropped {
            tracing::warn!(job_id, "Could not publish end of stream");
            channel.close();
        }
    } else {
        let flushed = tokio::time::timeout(FLUSH_TIMEOUT, async {
            while !channel.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if flushed.is_err() {
            tracing::debug!(job_id, pending = channel.len(), "Discarding unsent frames");
        }
        channel.close();
    }

    match tokio::time::timeout(DRAIN_TIMEOUT, writer).await {
        Ok(Ok(Ok(written))) => tracing::debug!(job_id, written, "Frame output drained"),
        Ok(Ok(Err(e))) => tracing::warn!(job_id, error = %e, "Frame output failed"),
        Ok(Err(e)) => tracing::warn!(job_id, error = %e, "Frame output task panicked"),
        Err(_) => tracing::warn!(job_id, "Timed out draining frame output"),
    }
    channel.close();
}

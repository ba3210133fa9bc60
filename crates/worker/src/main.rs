//! `framewatch-worker` -- runs one video-analysis job.
//!
//! Spawned by the supervisor. The job spec arrives as JSON on stdin; frames
//! leave as length-delimited messages on stdout. Logs go to stderr.
//!
//! # Environment variables
//!
//! | Variable                        | Required | Default               | Description                   |
//! |---------------------------------|----------|-----------------------|-------------------------------|
//! | `FRAMEWATCH_JOB_ID`             | no       | from spec             | Job id for early failures     |
//! | `FRAMEWATCH_COMPLETION_MARKER`  | no       | `<output_dir>/error.json` | Where failures are recorded |
//! | `RUST_LOG`                      | no       | `framewatch_worker=info` | Log filter                 |
//!
//! Exits 0 when the source was consumed or the worker was asked to stop,
//! and 1 after writing the completion marker otherwise.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use framewatch_core::types::DbId;
use framewatch_core::worker_spec::{WorkerSpec, ENV_COMPLETION_MARKER, ENV_JOB_ID};
use framewatch_worker::processor::build_processor;
use framewatch_worker::source::DefaultOpener;
use framewatch_worker::{Worker, WorkerError};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framewatch_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = format!("{e:#}");
            tracing::error!(error = %error, "Worker exiting with failure");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let marker_override = std::env::var_os(ENV_COMPLETION_MARKER).map(PathBuf::from);
    let env_job_id: DbId = std::env::var(ENV_JOB_ID)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();

    let spec = match read_spec().await {
        Ok(spec) => spec,
        Err(e) => {
            let err = WorkerError::Spec(format!("{e:#}"));
            if let Some(path) = &marker_override {
                record_failure(&err, env_job_id, path);
            }
            return Err(err).context("reading worker spec from stdin");
        }
    };

    let marker_path = marker_override.unwrap_or_else(|| {
        framewatch_core::layout::ArtifactLayout::from_job_dir(&spec.output_dir).marker_path()
    });

    let processor = match build_processor(&spec.processor) {
        Ok(processor) => processor,
        Err(e) => {
            let err = WorkerError::from(e);
            record_failure(&err, spec.job_id, &marker_path);
            return Err(err).context("building frame processor");
        }
    };

    tracing::info!(
        job_id = spec.job_id,
        kind = %spec.kind,
        source = %spec.source.location(),
        "Worker starting",
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(forward_shutdown(shutdown.clone()));

    let job_id = spec.job_id;
    Worker::new(spec, processor, Arc::new(DefaultOpener))
        .with_marker_path(marker_path)
        .run(tokio::io::stdout(), shutdown)
        .await
        .with_context(|| format!("job {job_id} failed"))?;
    Ok(())
}

async fn read_spec() -> anyhow::Result<WorkerSpec> {
    let mut raw = String::new();
    tokio::io::stdin().read_to_string(&mut raw).await?;
    let spec = serde_json::from_str(&raw)?;
    Ok(spec)
}

fn record_failure(err: &WorkerError, job_id: DbId, path: &std::path::Path) {
    if let Err(e) = err.to_marker(job_id).write(path) {
        tracing::error!(job_id, error = %e, "Failed to write completion marker");
    }
}

/// Cancel `shutdown` on SIGTERM or Ctrl-C.
async fn forward_shutdown(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, stopping"),
        () = terminate => tracing::info!("Received SIGTERM, stopping"),
    }
    shutdown.cancel();
}

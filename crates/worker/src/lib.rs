//! Worker process for one video-analysis job.
//!
//! The binary reads a [`WorkerSpec`](framewatch_core::worker_spec::WorkerSpec)
//! from stdin, runs it with [`run::Worker`], and streams frames to stdout.

pub mod artifacts;
pub mod error;
pub mod output;
pub mod processor;
pub mod progress;
pub mod run;
pub mod source;

pub use error::WorkerError;
pub use run::{RunSummary, Worker};

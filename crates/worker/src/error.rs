use framewatch_core::marker::{CompletionMarker, FailureKind};
use framewatch_core::processor::ProcessorError;
use framewatch_core::types::DbId;

/// Failures of a worker run. Each one ends the run and is recorded in the
/// completion marker; live read failures are retried inside the run loop and
/// never surface here.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The source could not be opened. Never retried.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A finite source failed part-way through.
    #[error("source read failed: {0}")]
    SourceRead(String),

    #[error("live source could not be reopened after {attempts} attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },

    #[error("frame processing failed: {0}")]
    Processor(#[from] ProcessorError),

    #[error("invalid worker spec: {0}")]
    Spec(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::SourceUnavailable(_) | Self::SourceRead(_) => FailureKind::SourceUnavailable,
            Self::ReconnectExhausted { .. } => FailureKind::ReconnectExhausted,
            Self::Processor(_) => FailureKind::Processor,
            Self::Spec(_) | Self::Io(_) => FailureKind::Internal,
        }
    }

    /// Completion marker describing this failure, with the full source chain
    /// as the diagnostic.
    pub fn to_marker(&self, job_id: DbId) -> CompletionMarker {
        let mut diagnostic = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            diagnostic.push_str("\ncaused by: ");
            diagnostic.push_str(&cause.to_string());
            source = cause.source();
        }
        CompletionMarker::new(job_id, self.failure_kind(), self.to_string()).with_diagnostic(diagnostic)
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use framewatch_core::error::CoreError;
use framewatch_pipeline::LifecycleError;
use serde::Serialize;

/// Error returned by handlers. Renders as `{ "error": ..., "code": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Failure inside the service (filesystem, worker plumbing). The detail
    /// is logged, never sent to the client.
    #[error("internal failure: {0}")]
    InternalError(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        Self::Core(err.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str, String) {
        let core = match self {
            Self::Core(core) => core,
            Self::InternalError(detail) => return internal(detail),
        };
        match core {
            CoreError::NotFound { entity, id } => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{entity} with id {id} not found"),
            ),
            CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            CoreError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            CoreError::Internal(detail) => internal(detail),
        }
    }
}

fn internal(detail: &str) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %detail, "Request failed internally");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "Internal server error".to_owned(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error) = self.classify();
        (status, Json(ErrorBody { error, code })).into_response()
    }
}

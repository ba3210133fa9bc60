//! Handlers for the `/jobs` resource.
//!
//! All endpoints require authentication via [`AuthUser`]. State changes go
//! through the lifecycle controller; artifact endpoints read the job's
//! output directory directly.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use framewatch_core::error::CoreError;
use framewatch_core::job::{JobKind, NewJob, SourceDescriptor};
use framewatch_core::processor::ProcessorConfig;
use framewatch_core::types::DbId;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterJobRequest {
    #[validate(length(min = 1, max = 128, message = "name must be 1 to 128 characters"))]
    pub name: String,
    pub kind: JobKind,
    #[serde(default)]
    pub source: Option<SourceDescriptor>,
    #[serde(default)]
    #[validate(custom(function = "validate_processor"))]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub parent_id: Option<DbId>,
}

impl From<RegisterJobRequest> for NewJob {
    fn from(req: RegisterJobRequest) -> Self {
        NewJob {
            name: req.name,
            kind: req.kind,
            source: req.source,
            processor: req.processor,
            parent_id: req.parent_id,
        }
    }
}

fn validate_processor(processor: &ProcessorConfig) -> Result<(), ValidationError> {
    let ProcessorConfig::Http {
        endpoint,
        timeout_ms,
        ..
    } = processor
    else {
        return Ok(());
    };

    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        let mut err = ValidationError::new("processor_endpoint");
        err.message = Some("detector endpoint must be an http(s) URL".into());
        return Err(err);
    }
    if *timeout_ms == 0 {
        let mut err = ValidationError::new("processor_timeout");
        err.message = Some("detector timeout must be positive".into());
        return Err(err);
    }
    Ok(())
}

/// Output artifact of an offline job.
#[derive(Debug, Serialize)]
pub struct ArtifactInfo {
    pub exists: bool,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct JobLog {
    pub job_id: DbId,
    pub content: String,
}

// ---------------------------------------------------------------------------
// Register / list / get / delete
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Register a job in `stopped` state. Returns 201 with the created job.
pub async fn register_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<RegisterJobRequest>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))?;

    let job = state.controller.register(input.into()).await?;

    tracing::info!(
        job_id = job.id,
        kind = %job.kind,
        user_id = auth.user_id,
        "Job registered",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// GET /api/v1/jobs
pub async fn list_jobs(
    _auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.controller.list().await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.controller.get(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// DELETE /api/v1/jobs/{id}
///
/// Returns 204. Rejected with 409 while the job is active or has monitors.
pub async fn delete_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.controller.delete(job_id).await?;
    tracing::info!(job_id, user_id = auth.user_id, "Job deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Start / stop
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/start
///
/// Spawns the worker and returns the job in `starting` state. 409 if the
/// job is already active or is a monitor whose parent is not running.
pub async fn start_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.controller.start(job_id).await?;
    tracing::info!(job_id, user_id = auth.user_id, "Job start requested");
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/stop
///
/// 409 while the job's monitor is still active.
pub async fn stop_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.controller.stop(job_id).await?;
    tracing::info!(job_id, user_id = auth.user_id, state = ?job.state, "Job stop requested");
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/log
pub async fn job_log(
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.controller.get(job_id).await?;
    let path = state.supervisor().layout(job_id).log_path();

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::Core(CoreError::NotFound {
                entity: "Process log",
                id: job_id,
            }));
        }
        Err(e) => {
            return Err(AppError::InternalError(format!(
                "reading {}: {e}",
                path.display()
            )))
        }
    };

    Ok(Json(DataResponse {
        data: JobLog { job_id, content },
    }))
}

/// GET /api/v1/jobs/{id}/frames
///
/// Keyframe file names ordered by frame index.
pub async fn job_frames(
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.controller.get(job_id).await?;
    let frames = state
        .supervisor()
        .layout(job_id)
        .list_keyframes()
        .await
        .map_err(|e| AppError::InternalError(format!("listing keyframes: {e}")))?;
    Ok(Json(DataResponse { data: frames }))
}

/// GET /api/v1/jobs/{id}/artifact
pub async fn job_artifact(
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.controller.get(job_id).await?;
    let path = state.supervisor().layout(job_id).output_path();

    let info = match tokio::fs::metadata(&path).await {
        Ok(meta) => ArtifactInfo {
            exists: true,
            size_bytes: Some(meta.len()),
        },
        Err(_) => ArtifactInfo {
            exists: false,
            size_bytes: None,
        },
    };
    Ok(Json(DataResponse { data: info }))
}

//! Route definitions for the `/jobs` resource.
//!
//! All endpoints require authentication.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> register_job
/// GET    /{id}            -> get_job
/// DELETE /{id}            -> delete_job
/// POST   /{id}/start      -> start_job
/// POST   /{id}/stop       -> stop_job
/// GET    /{id}/log        -> job_log
/// GET    /{id}/frames     -> job_frames
/// GET    /{id}/artifact   -> job_artifact
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::register_job))
        .route("/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/{id}/start", post(jobs::start_job))
        .route("/{id}/stop", post(jobs::stop_job))
        .route("/{id}/log", get(jobs::job_log))
        .route("/{id}/frames", get(jobs::job_frames))
        .route("/{id}/artifact", get(jobs::job_artifact))
}

pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                         list, register
/// /jobs/{id}                    get, delete
/// /jobs/{id}/start              start (POST)
/// /jobs/{id}/stop               stop (POST)
/// /jobs/{id}/log                progress log (GET)
/// /jobs/{id}/frames             keyframe names (GET)
/// /jobs/{id}/artifact           output artifact info (GET)
/// ```
///
/// The live stream lives at the root: see [`crate::ws::router`].
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}

//! Application router shared by the binary and integration tests.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::state::AppState;
use crate::{routes, ws};

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// `/health`, `/ws/jobs/{id}` and everything under `/api/v1`, wrapped in
/// the HTTP middleware stack.
pub fn app_router(state: AppState, config: &ServerConfig) -> Router {
    // ServiceBuilder order is outermost first.
    // CORS is applied as a separate, outer router layer (still outermost)
    // because `Cors` requires a `Default` response body.
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(REQUEST_ID, MakeRequestUuid))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<Body>| {
                    let request_id = req
                        .headers()
                        .get(&REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "http",
                        method = %req.method(),
                        path = %req.uri().path(),
                        request_id,
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(PropagateRequestIdLayer::new(REQUEST_ID))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(CatchPanicLayer::new());

    Router::new()
        .merge(routes::health::router())
        .merge(ws::router())
        .nest("/api/v1", routes::api_routes())
        .layer(middleware)
        .layer(cors_layer(&config.cors_origins))
        .with_state(state)
}

/// # Panics
///
/// Panics at startup if an origin is not a valid header value.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => value,
            Err(e) => panic!("CORS_ORIGINS entry {origin:?} is not a header value: {e}"),
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(600))
}

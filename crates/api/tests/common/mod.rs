#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use framewatch_api::auth::jwt::{generate_access_token, JwtConfig};
use framewatch_api::config::ServerConfig;
use framewatch_api::router::app_router;
use framewatch_api::state::AppState;
use framewatch_core::job::JobState;
use framewatch_core::types::DbId;
use framewatch_pipeline::{JobStore, LifecycleController, MemoryJobStore, Supervisor, SupervisorConfig};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "framewatch-test-secret";

/// Reads its spec, then sleeps until signalled.
pub const SLEEPER: &str = "cat >/dev/null; exec sleep 30";
/// Emits one image frame (seq 0, payload "hi") then sleeps.
pub const ONE_FRAME: &str = r#"cat >/dev/null
printf '\000\000\000\023\001\000\000\000\000\000\000\000\000\000\000\000\000\000\000\000\000hi'
exec sleep 30"#;

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        ws_auth_timeout_secs: 2,
        jwt: JwtConfig {
            secret: TEST_SECRET.to_string(),
            access_token_expiry_mins: 30,
        },
    }
}

/// A running test application: state plus the scratch results directory.
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryJobStore>,
    pub results: tempfile::TempDir,
}

impl TestApp {
    /// Application whose workers run `script` under `/bin/sh`.
    pub fn with_script(script: &str) -> Self {
        let results = tempfile::tempdir().unwrap();
        let supervisor_config = SupervisorConfig {
            worker_bin: "/bin/sh".into(),
            worker_args: vec!["-c".into(), script.into()],
            results_dir: results.path().to_path_buf(),
            poll_interval: Duration::from_millis(50),
            stop_grace: Duration::from_millis(500),
            ..Default::default()
        };
        Self::with_supervisor_config(supervisor_config, results)
    }

    pub fn with_supervisor_config(config: SupervisorConfig, results: tempfile::TempDir) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let supervisor = Arc::new(Supervisor::new(
            SupervisorConfig {
                results_dir: results.path().to_path_buf(),
                ..config
            },
            store.clone() as Arc<dyn JobStore>,
        ));
        let controller = Arc::new(LifecycleController::new(
            store.clone() as Arc<dyn JobStore>,
            supervisor,
        ));
        let state = AppState {
            config: Arc::new(test_config()),
            controller,
            shutdown: CancellationToken::new(),
        };
        Self {
            state,
            store,
            results,
        }
    }

    pub fn router(&self) -> Router {
        app_router(self.state.clone(), &test_config())
    }

    pub async fn state_of(&self, id: DbId) -> JobState {
        self.store.get(id).await.unwrap().unwrap().state
    }

    /// Poll until job `id` reaches `state` (5s budget); returns the last seen state.
    pub async fn wait_for_state(&self, id: DbId, state: JobState) -> JobState {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let current = self.state_of(id).await;
            if current == state || tokio::time::Instant::now() >= deadline {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait for the worker of `id` to leave the registry; `false` on timeout.
    pub async fn wait_for_deregistered(&self, id: DbId) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.state.supervisor().is_registered(id).await {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

pub fn token() -> String {
    generate_access_token(1, "operator", &test_config().jwt).unwrap()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, None, None).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn post_auth(app: Router, uri: &str, token: &str) -> Response {
    send(app, Method::POST, uri, Some(token), None).await
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn delete_auth(app: Router, uri: &str, token: &str) -> Response {
    send(app, Method::DELETE, uri, Some(token), None).await
}

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

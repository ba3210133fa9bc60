use std::sync::Arc;

use framewatch_pipeline::{LifecycleController, Supervisor};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Job lifecycle operations; owns the supervisor.
    pub controller: Arc<LifecycleController>,
    /// Cancelled when the server begins shutting down; live streams close.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        self.controller.supervisor()
    }
}

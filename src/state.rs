use crate::config::AppConfig;
use crate::controller::ControllerHandle;
use crate::history::TransitionLog;
use std::sync::Arc;

/// Shared state behind the HTTP API.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Inbox of the running controller loop
    pub controller: ControllerHandle,
    /// Same log the controller writes to; read by /api/history and /api/ws.
    pub history: TransitionLog,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, controller: ControllerHandle, history: TransitionLog) -> Self {
        Self {
            config,
            controller,
            history,
        }
    }
}

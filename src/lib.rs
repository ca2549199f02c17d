pub mod agent;
pub mod api;
pub mod browser;
pub mod config;
pub mod controller;
pub mod error;
pub mod guard;
pub mod history;
pub mod images;
pub mod job;
pub mod observer;
pub mod runtime;
pub mod site;
pub mod state;
pub mod store;

use history::TransitionLog;
use state::AppState;
use std::sync::Arc;
use store::{FileKvStore, JobStore};

/// Load config, attach to Chrome, start the controller and (if enabled) the
/// HTTP API, then run until Ctrl-C.
pub async fn run() -> error::Result<()> {
    // Never overwrite an existing config file on failure
    let config = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}. Using in-memory defaults (not saving).", e);
            config::AppConfig::default()
        }
    };
    let config = Arc::new(config);

    let kv = FileKvStore::open(config.store.path.clone())?;
    tracing::info!("Job store at {}", kv.path().display());
    let store = JobStore::new(Arc::new(kv));

    let history = TransitionLog::with_dir(history::default_log_dir());
    let runtime = runtime::start(config.clone(), store.clone(), history.clone()).await?;
    match runtime::orphaned_job(&store, &runtime.page)? {
        Some(record) => tracing::warn!(
            "Job {} ({}) is bound to page {} from an earlier browser session and cannot continue on {}; clear it with DELETE /api/job",
            record.id,
            record.status,
            record.bound_page,
            runtime.page
        ),
        None => {
            if let Some(record) = store.load()? {
                tracing::info!("Resuming job {} in {}", record.id, record.status);
            }
        }
    }

    let api = &config.api;
    if api.enabled && api.port > 0 {
        let state = Arc::new(AppState::new(config.clone(), runtime.controller.clone(), history));
        let port = api.port;
        let api_key = api.api_key.clone();
        tokio::spawn(async move {
            if let Err(e) = crate::api::run_server(state, port, api_key).await {
                tracing::error!("API server error: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down; the job record stays on disk");
    runtime.client.close().await;
    Ok(())
}

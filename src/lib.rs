pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{restore_session_impl, spawn_periodic_sync, AppState};
use infrastructure::error::InfraError;
use infrastructure::logging::init_logging;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

pub use application::notifications::{Notification, NotificationKind};
pub use domain::models::{DurationInput, Session, Space, SpacePatch, TimeEntry, TimeEntryPatch};
pub use domain::period::PeriodSpec;

/// A running core: shared state, the periodic sync task and the log writer.
pub struct Application {
    state: Arc<AppState>,
    periodic: JoinHandle<()>,
    _log_guard: WorkerGuard,
}

impl Application {
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Stops periodic sync; buffered log lines are flushed when dropped.
    pub fn shutdown(self) {
        self.periodic.abort();
    }
}

/// Prepares the workspace, restores a persisted session and starts periodic
/// sync. Must be called inside a tokio runtime.
pub async fn launch(workspace_root: PathBuf) -> Result<Application, InfraError> {
    let state = Arc::new(AppState::new(workspace_root)?);
    let log_guard = init_logging(state.logs_dir())?;
    info!(
        app_name = %state.config().app_name,
        database = %state.database_path().display(),
        remote = state.config().remote.is_some(),
        "spacelog core started"
    );

    if let Err(error) = restore_session_impl(&state).await {
        warn!(%error, "session restore failed; continuing signed out");
    }

    let periodic = spawn_periodic_sync(Arc::clone(&state));
    Ok(Application {
        state,
        periodic,
        _log_guard: log_guard,
    })
}

use crate::infrastructure::config::{ensure_default_configs, load_app_config_from_lookup, AppConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATABASE_FILE: &str = "spacelog.sqlite";

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
    pub config: AppConfig,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    bootstrap_workspace_with_lookup(workspace_root, |key| std::env::var(key).ok())
}

/// Creates `config/`, `state/` and `logs/` under the workspace, writes any
/// missing default config file and prepares the database.
pub fn bootstrap_workspace_with_lookup<F>(workspace_root: &Path, lookup: F) -> Result<BootstrapResult, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join(DATABASE_FILE);

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let config = load_app_config_from_lookup(&config_dir, lookup)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_TEMP_ROOT: AtomicU64 = AtomicU64::new(0);

    fn temp_root() -> PathBuf {
        let sequence = NEXT_TEMP_ROOT.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("spacelog-bootstrap-{}-{}", std::process::id(), sequence))
    }

    #[test]
    fn bootstrap_creates_layout_and_guest_config() {
        let root = temp_root();
        let result = bootstrap_workspace_with_lookup(&root, |_| None).expect("bootstrap");

        assert!(result.config_dir.join("app.json").exists());
        assert!(result.config_dir.join("remote.json").exists());
        assert!(result.config_dir.join("sync.json").exists());
        assert!(result.logs_dir.is_dir());
        assert!(result.database_path.exists());
        assert!(result.config.remote.is_none());

        let again = bootstrap_workspace_with_lookup(&root, |_| None).expect("bootstrap twice");
        assert_eq!(again.database_path, result.database_path);
        let _ = fs::remove_dir_all(&root);
    }
}

use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

const APP_JSON: &str = "app.json";
const REMOTE_JSON: &str = "remote.json";
const SYNC_JSON: &str = "sync.json";

pub const REMOTE_URL_ENV: &str = "SPACELOG_REMOTE_URL";
pub const REMOTE_API_KEY_ENV: &str = "SPACELOG_REMOTE_API_KEY";
const DEFAULT_SYNC_INTERVAL_SECONDS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: Url,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub interval: Duration,
    pub sync_on_foreground: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECONDS),
            sync_on_foreground: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub app_name: String,
    pub timezone: Tz,
    /// `None` runs the application in guest mode.
    pub remote: Option<RemoteConfig>,
    pub sync: SyncConfig,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Spacelog",
                "timezone": "UTC"
            }),
        ),
        (
            REMOTE_JSON,
            serde_json::json!({
                "schema": 1,
                "baseUrl": null,
                "apiKey": null
            }),
        ),
        (
            SYNC_JSON,
            serde_json::json!({
                "schema": 1,
                "intervalSeconds": DEFAULT_SYNC_INTERVAL_SECONDS,
                "syncOnForeground": true
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn optional_str<'a>(value: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    load_app_config_from_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_app_config_from_lookup<F>(config_dir: &Path, lookup: F) -> Result<AppConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app = read_config(&config_dir.join(APP_JSON))?;
    let remote = read_config(&config_dir.join(REMOTE_JSON))?;
    let sync = read_config(&config_dir.join(SYNC_JSON))?;

    let app_name = optional_str(&app, "appName").unwrap_or("Spacelog").to_string();
    let timezone_name = optional_str(&app, "timezone").unwrap_or("UTC");
    let timezone = timezone_name.parse::<Tz>().map_err(|error| {
        InfraError::InvalidConfig(format!("invalid timezone '{timezone_name}' in {APP_JSON}: {error}"))
    })?;

    Ok(AppConfig {
        app_name,
        timezone,
        remote: parse_remote_config(&remote, &lookup)?,
        sync: parse_sync_config(&sync)?,
    })
}

fn parse_remote_config<F>(remote: &serde_json::Value, lookup: &F) -> Result<Option<RemoteConfig>, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let base_url = lookup(REMOTE_URL_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| optional_str(remote, "baseUrl").map(ToOwned::to_owned));
    let api_key = lookup(REMOTE_API_KEY_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| optional_str(remote, "apiKey").map(ToOwned::to_owned));

    match (base_url, api_key) {
        (None, None) => Ok(None),
        (Some(base_url), Some(api_key)) => {
            let base_url = Url::parse(&base_url).map_err(|error| {
                InfraError::InvalidConfig(format!("invalid remote baseUrl '{base_url}': {error}"))
            })?;
            Ok(Some(RemoteConfig { base_url, api_key }))
        }
        (Some(_), None) => Err(InfraError::InvalidConfig(
            "remote apiKey is required when baseUrl is set".to_string(),
        )),
        (None, Some(_)) => Err(InfraError::InvalidConfig(
            "remote baseUrl is required when apiKey is set".to_string(),
        )),
    }
}

fn parse_sync_config(sync: &serde_json::Value) -> Result<SyncConfig, InfraError> {
    let defaults = SyncConfig::default();
    let interval = match sync.get("intervalSeconds") {
        None | Some(serde_json::Value::Null) => defaults.interval,
        Some(value) => {
            let seconds = value
                .as_u64()
                .filter(|seconds| *seconds > 0)
                .ok_or_else(|| {
                    InfraError::InvalidConfig(format!("intervalSeconds in {SYNC_JSON} must be a positive integer"))
                })?;
            Duration::from_secs(seconds)
        }
    };
    let sync_on_foreground = sync
        .get("syncOnForeground")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(defaults.sync_on_foreground);

    Ok(SyncConfig {
        interval,
        sync_on_foreground,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_CONFIG_DIR: AtomicU64 = AtomicU64::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_CONFIG_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "spacelog-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            ensure_default_configs(&path).expect("write defaults");
            Self { path }
        }

        fn write(&self, name: &str, value: serde_json::Value) {
            fs::write(self.path.join(name), value.to_string()).expect("write config");
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_run_in_guest_mode_with_five_minute_sync() {
        let dir = TempConfigDir::new();
        let config = load_app_config_from_lookup(&dir.path, no_env).expect("load");
        assert_eq!(config.app_name, "Spacelog");
        assert_eq!(config.timezone, chrono_tz::UTC);
        assert!(config.remote.is_none());
        assert_eq!(config.sync.interval, Duration::from_secs(300));
        assert!(config.sync.sync_on_foreground);
    }

    #[test]
    fn ensure_defaults_keeps_existing_files() {
        let dir = TempConfigDir::new();
        dir.write(APP_JSON, serde_json::json!({"schema": 1, "appName": "Mine", "timezone": "Europe/Madrid"}));
        ensure_default_configs(&dir.path).expect("ensure again");
        let config = load_app_config_from_lookup(&dir.path, no_env).expect("load");
        assert_eq!(config.app_name, "Mine");
        assert_eq!(config.timezone, chrono_tz::Europe::Madrid);
    }

    #[test]
    fn env_overrides_remote_settings() {
        let dir = TempConfigDir::new();
        let config = load_app_config_from_lookup(&dir.path, |key| match key {
            REMOTE_URL_ENV => Some("https://project.example.co".to_string()),
            REMOTE_API_KEY_ENV => Some("anon".to_string()),
            _ => None,
        })
        .expect("load");
        let remote = config.remote.expect("remote configured");
        assert_eq!(remote.base_url.as_str(), "https://project.example.co/");
        assert_eq!(remote.api_key, "anon");
    }

    #[test]
    fn half_configured_remote_is_rejected() {
        let dir = TempConfigDir::new();
        dir.write(
            REMOTE_JSON,
            serde_json::json!({"schema": 1, "baseUrl": "https://project.example.co", "apiKey": null}),
        );
        match load_app_config_from_lookup(&dir.path, no_env) {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("apiKey")),
            other => panic!("expected invalid config error, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_schema_and_bad_timezone_are_rejected() {
        let dir = TempConfigDir::new();
        dir.write(SYNC_JSON, serde_json::json!({"schema": 2}));
        assert!(matches!(
            load_app_config_from_lookup(&dir.path, no_env),
            Err(InfraError::InvalidConfig(_))
        ));

        let dir = TempConfigDir::new();
        dir.write(APP_JSON, serde_json::json!({"schema": 1, "timezone": "Mars/Olympus"}));
        assert!(matches!(
            load_app_config_from_lookup(&dir.path, no_env),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let dir = TempConfigDir::new();
        dir.write(SYNC_JSON, serde_json::json!({"schema": 1, "intervalSeconds": 0}));
        assert!(load_app_config_from_lookup(&dir.path, no_env).is_err());
    }
}

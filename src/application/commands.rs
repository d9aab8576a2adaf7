use crate::application::bootstrap::{bootstrap_workspace, bootstrap_workspace_with_lookup, BootstrapResult};
use crate::application::data_sync::{spawn_periodic, DataSyncService, PassOutcome, SkipReason, SyncReport, SyncStatus, SyncTrigger};
use crate::application::notifications::{
    BroadcastNotifier, Notification, NotificationSink, ERROR_NETWORK_OFFLINE, ERROR_SAVE_FAILED, ERROR_SYNC_FAILED,
    INFO_NETWORK_ONLINE, SUCCESS_IMPORT_COMPLETE,
};
use crate::application::session::{NowProvider, SessionHolder, SessionManager, SessionTransition};
use crate::application::transfer::{build_export, export_file_name, new_record_id, prepare_import, ExportDocument};
use crate::domain::aggregation::{available_tags, compute_statistics, PeriodStatistics};
use crate::domain::calendar::{entries_on, month_view, CalendarMonth};
use crate::domain::models::{
    format_date, format_hours, normalize_tags, parse_date, DurationInput, Session, Space, SpacePatch, TimeEntry,
    TimeEntryPatch, TIME_FORMAT,
};
use crate::domain::period::PeriodSpec;
use crate::domain::projection::{calculate, FinancialRequest, FinancialSummary};
use crate::infrastructure::auth_client::{AuthHttpClient, ReqwestAuthClient};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::connectivity::{Connectivity, ConnectivityFlag};
use crate::infrastructure::credential_store::{KeyringSessionStore, SessionStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::LocalRepository;
use crate::infrastructure::remote_store::{PostgrestRemoteStore, RemoteStore};
use crate::infrastructure::storage::{KeyValueStore, SqliteKeyValueStore};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Sessions = SessionManager<dyn SessionStore, dyn AuthHttpClient>;
type SyncEngine = DataSyncService<dyn RemoteStore, dyn KeyValueStore, BroadcastNotifier>;

/// Remote collaborators; absent in guest mode.
pub struct CloudParts {
    pub remote: Arc<dyn RemoteStore>,
    pub auth_client: Arc<dyn AuthHttpClient>,
}

pub struct AppParts {
    pub key_value_store: Arc<dyn KeyValueStore>,
    pub session_store: Arc<dyn SessionStore>,
    pub cloud: Option<CloudParts>,
}

struct Cloud {
    remote: Arc<dyn RemoteStore>,
    sessions: Sessions,
    sync: SyncEngine,
}

pub struct AppState {
    config: AppConfig,
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    local: Arc<LocalRepository<dyn KeyValueStore>>,
    holder: Arc<SessionHolder>,
    notifier: Arc<BroadcastNotifier>,
    connectivity: Arc<ConnectivityFlag>,
    cloud: Option<Cloud>,
    now_provider: NowProvider,
}

impl AppState {
    /// Wires the SQLite store, the OS keyring and, when configured, the
    /// remote store and identity service.
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let cloud = bootstrap.config.remote.as_ref().map(|remote| CloudParts {
            remote: Arc::new(PostgrestRemoteStore::new(remote.base_url.clone(), remote.api_key.clone()))
                as Arc<dyn RemoteStore>,
            auth_client: Arc::new(ReqwestAuthClient::new(remote.base_url.clone(), remote.api_key.clone()))
                as Arc<dyn AuthHttpClient>,
        });
        let parts = AppParts {
            key_value_store: Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path)),
            session_store: Arc::new(KeyringSessionStore::default()),
            cloud,
        };
        Ok(Self::assemble(bootstrap, parts))
    }

    /// Same layout as [`AppState::new`] with caller-supplied collaborators.
    /// Configuration comes from the workspace files only.
    pub fn with_parts(workspace_root: PathBuf, parts: AppParts) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace_with_lookup(&workspace_root, |_| None)?;
        Ok(Self::assemble(bootstrap, parts))
    }

    fn assemble(bootstrap: BootstrapResult, parts: AppParts) -> Self {
        let local = Arc::new(LocalRepository::new(parts.key_value_store));
        let holder = Arc::new(SessionHolder::default());
        let notifier = Arc::new(BroadcastNotifier::default());
        let connectivity = Arc::new(ConnectivityFlag::default());
        let session_store = parts.session_store;

        let cloud = parts.cloud.map(|cloud| Cloud {
            sessions: SessionManager::new(Arc::clone(&holder), Arc::clone(&session_store), cloud.auth_client),
            sync: DataSyncService::new(
                Arc::clone(&cloud.remote),
                Arc::clone(&local),
                Arc::clone(&holder),
                Arc::clone(&connectivity) as Arc<dyn Connectivity>,
                Arc::clone(&notifier),
            ),
            remote: cloud.remote,
        });

        Self {
            config: bootstrap.config,
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            local,
            holder,
            notifier,
            connectivity,
            cloud,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.cloud = self.cloud.map(|cloud| Cloud {
            remote: cloud.remote,
            sessions: cloud.sessions.with_now_provider(Arc::clone(&now_provider)),
            sync: cloud.sync.with_now_provider(Arc::clone(&now_provider)),
        });
        self.now_provider = now_provider;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!(command, "{message}");
    }

    pub fn log_error(&self, command: &str, message: &str) {
        error!(command, "{message}");
    }

    /// Wall-clock time in the configured timezone.
    fn now_local(&self) -> NaiveDateTime {
        (self.now_provider)()
            .with_timezone(&self.config.timezone)
            .naive_local()
    }

    fn today(&self) -> NaiveDate {
        self.now_local().date()
    }

    fn session_view(&self) -> SessionView {
        let current = self.holder.current();
        SessionView {
            authenticated: current.is_some(),
            user_id: current.as_ref().map(|session| session.user_id.clone()),
            email: current.and_then(|session| session.email),
            remote_configured: self.cloud.is_some(),
        }
    }

    fn require_cloud(&self) -> Result<&Cloud, InfraError> {
        self.cloud
            .as_ref()
            .ok_or_else(|| InfraError::InvalidConfig("remote store is not configured".to_string()))
    }

    /// Starts union-merge sync semantics for a new identity. Data left by a
    /// different account is removed first.
    fn begin_identity(&self, cloud: &Cloud, transition: SessionTransition) -> Result<bool, InfraError> {
        if transition == SessionTransition::AccountChanged {
            cloud.sync.handle_account_change()?;
        } else if transition.starts_identity() {
            cloud.sync.handle_sign_in();
        }
        Ok(transition.starts_identity())
    }

    fn end_identity(&self) -> Result<(), InfraError> {
        match &self.cloud {
            Some(cloud) => cloud.sync.handle_sign_out(),
            None => Ok(()),
        }
    }

    fn entries_of(&self, space_id: Option<&str>) -> Result<Vec<TimeEntry>, InfraError> {
        let now = self.now_local();
        Ok(self
            .local
            .load_entries()?
            .into_iter()
            .filter(|entry| space_id.is_none_or(|space_id| entry.space_id == space_id))
            .map(|mut entry| {
                entry.duration = entry.effective_duration(now);
                entry
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub remote_configured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncResponse {
    Skipped { reason: String },
    Offline,
    Completed { report: SyncReport },
    Discarded,
    Failed { message: String },
}

impl From<PassOutcome> for SyncResponse {
    fn from(outcome: PassOutcome) -> Self {
        match outcome {
            PassOutcome::Skipped(SkipReason::SignedOut) => Self::Skipped {
                reason: "signed_out".to_string(),
            },
            PassOutcome::Skipped(SkipReason::AlreadyRunning) => Self::Skipped {
                reason: "already_running".to_string(),
            },
            PassOutcome::Offline => Self::Offline,
            PassOutcome::Completed(report) => Self::Completed { report },
            PassOutcome::Discarded => Self::Discarded,
            PassOutcome::Failed(message) => Self::Failed { message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session: SessionView,
    pub sync: SyncResponse,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryRequest {
    pub space_id: String,
    /// Defaults to today.
    #[serde(default)]
    pub date: Option<String>,
    pub input: DurationInput,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: TimeEntry,
    pub effective_hours: f64,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub file_name: String,
    pub document: ExportDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub spaces: usize,
    pub entries: usize,
    pub dropped_entries: usize,
}

async fn run_sync(state: &AppState, trigger: SyncTrigger) -> Result<SyncResponse, InfraError> {
    let Some(cloud) = state.cloud.as_ref() else {
        return Ok(PassOutcome::Skipped(SkipReason::SignedOut).into());
    };

    if state.connectivity.is_online() {
        match cloud.sessions.ensure_fresh().await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(PassOutcome::Skipped(SkipReason::SignedOut).into()),
            Err(InfraError::Unauthenticated) => {
                state.end_identity()?;
                return Ok(PassOutcome::Skipped(SkipReason::SignedOut).into());
            }
            Err(error) if error.is_transient() => {
                warn!(%error, "session refresh failed before sync");
                state.notifier.error(ERROR_SYNC_FAILED);
                return Ok(SyncResponse::Failed {
                    message: error.to_string(),
                });
            }
            Err(error) => return Err(error),
        }
    }

    Ok(cloud.sync.run_pass(trigger).await.into())
}

/// Sends a change to the remote store when signed in and online. Failures
/// are reported but the local change stays.
async fn write_through<F, Fut>(state: &AppState, command: &str, write: F)
where
    F: FnOnce(Arc<dyn RemoteStore>, Session) -> Fut,
    Fut: Future<Output = Result<(), InfraError>>,
{
    let Some(cloud) = state.cloud.as_ref() else {
        return;
    };
    if !state.holder.is_authenticated() {
        return;
    }
    if !state.connectivity.is_online() {
        debug!(command, "offline; change kept locally");
        return;
    }

    let session = match cloud.sessions.ensure_fresh().await {
        Ok(Some(session)) => session,
        Ok(None) => return,
        Err(InfraError::Unauthenticated) => {
            if let Err(error) = state.end_identity() {
                state.log_error(command, &format!("failed to clear local data: {error}"));
            }
            return;
        }
        Err(error) => {
            state.log_error(command, &format!("session refresh failed: {error}"));
            state.notifier.error(ERROR_SAVE_FAILED);
            return;
        }
    };

    if let Err(error) = write(Arc::clone(&cloud.remote), session).await {
        state.log_error(command, &format!("remote write failed: {error}"));
        state.notifier.error(ERROR_SAVE_FAILED);
    }
}

pub async fn sign_in_impl(state: &AppState, email: String, password: String) -> Result<SessionResponse, InfraError> {
    let cloud = state.require_cloud()?;
    let transition = cloud.sessions.sign_in(&email, &password).await?;
    let trigger = if state.begin_identity(cloud, transition)? {
        SyncTrigger::Login
    } else {
        SyncTrigger::Manual
    };
    let sync = run_sync(state, trigger).await?;
    state.log_info("sign_in", "signed in");
    Ok(SessionResponse {
        session: state.session_view(),
        sync,
    })
}

/// Restores a persisted session at launch and runs the login pass for it.
pub async fn restore_session_impl(state: &AppState) -> Result<SessionResponse, InfraError> {
    let Some(cloud) = state.cloud.as_ref() else {
        return Ok(SessionResponse {
            session: state.session_view(),
            sync: PassOutcome::Skipped(SkipReason::SignedOut).into(),
        });
    };
    let transition = cloud.sessions.restore().await?;
    let sync = if state.begin_identity(cloud, transition)? {
        run_sync(state, SyncTrigger::Login).await?
    } else {
        PassOutcome::Skipped(SkipReason::SignedOut).into()
    };
    Ok(SessionResponse {
        session: state.session_view(),
        sync,
    })
}

pub async fn sign_out_impl(state: &AppState) -> Result<SessionView, InfraError> {
    let Some(cloud) = state.cloud.as_ref() else {
        return Ok(state.session_view());
    };
    if cloud.sessions.sign_out().await == SessionTransition::SignedOut {
        cloud.sync.handle_sign_out()?;
        state.log_info("sign_out", "signed out and cleared local data");
    }
    Ok(state.session_view())
}

pub fn session_impl(state: &AppState) -> SessionView {
    state.session_view()
}

pub async fn sync_now_impl(state: &AppState) -> Result<SyncResponse, InfraError> {
    run_sync(state, SyncTrigger::Manual).await
}

pub async fn foreground_impl(state: &AppState) -> Result<SyncResponse, InfraError> {
    if !state.config.sync.sync_on_foreground {
        return Ok(SyncResponse::Skipped {
            reason: "disabled".to_string(),
        });
    }
    run_sync(state, SyncTrigger::Foreground).await
}

pub fn sync_status_impl(state: &AppState) -> SyncStatus {
    state
        .cloud
        .as_ref()
        .map(|cloud| cloud.sync.status())
        .unwrap_or_default()
}

pub fn set_online_impl(state: &AppState, online: bool) {
    if state.connectivity.is_online() == online {
        return;
    }
    state.connectivity.set_online(online);
    if online {
        state.notifier.info(INFO_NETWORK_ONLINE);
    } else {
        state.notifier.error(ERROR_NETWORK_OFFLINE);
    }
}

/// Runs an interval pass every configured period until the handle is
/// aborted.
pub fn spawn_periodic_sync(state: Arc<AppState>) -> JoinHandle<()> {
    let period = state.config.sync.interval;
    spawn_periodic(period, move || {
        let state = Arc::clone(&state);
        async move {
            if let Err(error) = run_sync(&state, SyncTrigger::Interval).await {
                state.log_error("periodic_sync", &error.to_string());
            }
        }
    })
}

pub fn list_spaces_impl(state: &AppState) -> Result<Vec<Space>, InfraError> {
    state.local.load_spaces()
}

pub async fn create_space_impl(
    state: &AppState,
    name: String,
    color: String,
    icon: Option<String>,
) -> Result<Space, InfraError> {
    let space = Space {
        id: new_record_id(),
        name: name.trim().to_string(),
        color: color.trim().to_string(),
        icon: icon.filter(|icon| !icon.trim().is_empty()),
    };
    space.validate().map_err(InfraError::Validation)?;

    state.local.update(|snapshot| {
        snapshot.spaces.push(space.clone());
        Ok(())
    })?;

    let created = space.clone();
    write_through(state, "create_space", |remote, session| async move {
        remote.create_space(&session, &created).await
    })
    .await;
    Ok(space)
}

/// Unknown ids are ignored and yield `None`.
pub async fn update_space_impl(state: &AppState, id: String, patch: SpacePatch) -> Result<Option<Space>, InfraError> {
    if patch.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        return Err(InfraError::Validation("space.name must not be empty".to_string()));
    }
    if patch.color.as_deref().is_some_and(|color| color.trim().is_empty()) {
        return Err(InfraError::Validation("space.color must not be empty".to_string()));
    }

    let updated = state.local.update(|snapshot| {
        Ok(snapshot.spaces.iter_mut().find(|space| space.id == id).map(|space| {
            space.apply(&patch);
            space.clone()
        }))
    })?;

    if updated.is_some() && !patch.is_empty() {
        write_through(state, "update_space", |remote, session| async move {
            remote.update_space(&session, &id, &patch).await
        })
        .await;
    }
    Ok(updated)
}

/// Removes the space and every entry logged against it.
pub async fn delete_space_impl(state: &AppState, id: String) -> Result<bool, InfraError> {
    let removed = state.local.update(|snapshot| {
        let before = snapshot.spaces.len();
        snapshot.spaces.retain(|space| space.id != id);
        snapshot.entries.retain(|entry| entry.space_id != id);
        Ok(snapshot.spaces.len() != before)
    })?;

    if removed {
        write_through(state, "delete_space", |remote, session| async move {
            remote.delete_space(&session, &id).await
        })
        .await;
    }
    Ok(removed)
}

pub fn list_entries_impl(state: &AppState, space_id: Option<String>) -> Result<Vec<EntryView>, InfraError> {
    let now = state.now_local();
    Ok(state
        .local
        .load_entries()?
        .into_iter()
        .filter(|entry| space_id.as_deref().is_none_or(|space_id| entry.space_id == space_id))
        .map(|entry| {
            let effective_hours = entry.effective_duration(now);
            EntryView {
                display: format_hours(effective_hours),
                effective_hours,
                entry,
            }
        })
        .collect())
}

pub async fn log_entry_impl(state: &AppState, request: LogEntryRequest) -> Result<TimeEntry, InfraError> {
    let date = match request.date.as_deref() {
        Some(raw) => parse_date(raw.trim())
            .ok_or_else(|| InfraError::Validation(format!("entry.date must be YYYY-MM-DD: {raw}")))?,
        None => state.today(),
    };
    let (duration, start_time, end_time, ongoing) = request.input.resolve().map_err(InfraError::Validation)?;

    let entry = TimeEntry {
        id: new_record_id(),
        space_id: request.space_id,
        date: format_date(date),
        duration,
        start_time,
        end_time,
        description: request.description.trim().to_string(),
        tags: normalize_tags(request.tags.iter().map(String::as_str)),
        icon: request.icon.filter(|icon| !icon.trim().is_empty()),
        is_ongoing: ongoing.then_some(true),
    };
    entry.validate().map_err(InfraError::Validation)?;

    state.local.update(|snapshot| {
        if !snapshot.spaces.iter().any(|space| space.id == entry.space_id) {
            return Err(InfraError::Validation(format!("space {} does not exist", entry.space_id)));
        }
        snapshot.entries.push(entry.clone());
        Ok(())
    })?;

    let created = entry.clone();
    write_through(state, "log_entry", |remote, session| async move {
        remote.create_entry(&session, &created).await
    })
    .await;
    Ok(entry)
}

/// The patched entry must stay valid; unknown ids yield `None`.
pub async fn update_entry_impl(
    state: &AppState,
    id: String,
    patch: TimeEntryPatch,
) -> Result<Option<TimeEntry>, InfraError> {
    let updated = state.local.update(|snapshot| {
        let Some(entry) = snapshot.entries.iter_mut().find(|entry| entry.id == id) else {
            return Ok(None);
        };
        let mut candidate = entry.clone();
        candidate.apply(&patch);
        candidate.validate().map_err(InfraError::Validation)?;
        *entry = candidate.clone();
        Ok(Some(candidate))
    })?;

    if updated.is_some() && !patch.is_empty() {
        write_through(state, "update_entry", |remote, session| async move {
            remote.update_entry(&session, &id, &patch).await
        })
        .await;
    }
    Ok(updated)
}

pub async fn delete_entry_impl(state: &AppState, id: String) -> Result<bool, InfraError> {
    let removed = state.local.update(|snapshot| {
        let before = snapshot.entries.len();
        snapshot.entries.retain(|entry| entry.id != id);
        Ok(snapshot.entries.len() != before)
    })?;

    if removed {
        write_through(state, "delete_entry", |remote, session| async move {
            remote.delete_entry(&session, &id).await
        })
        .await;
    }
    Ok(removed)
}

/// Finishes a running recording at the current time. Entries that are not
/// running are returned unchanged.
pub async fn stop_entry_impl(state: &AppState, id: String) -> Result<Option<TimeEntry>, InfraError> {
    let now = state.now_local();
    let stopped = state.local.update(|snapshot| {
        let Some(entry) = snapshot.entries.iter_mut().find(|entry| entry.id == id) else {
            return Ok(None);
        };
        if !entry.is_ongoing() {
            return Ok(Some((entry.clone(), None)));
        }
        let patch = TimeEntryPatch {
            duration: Some(entry.effective_duration(now)),
            end_time: Some(Some(now.format(TIME_FORMAT).to_string())),
            is_ongoing: Some(false),
            ..TimeEntryPatch::default()
        };
        entry.apply(&patch);
        Ok(Some((entry.clone(), Some(patch))))
    })?;

    let Some((entry, patch)) = stopped else {
        return Ok(None);
    };
    if let Some(patch) = patch {
        write_through(state, "stop_entry", |remote, session| async move {
            remote.update_entry(&session, &id, &patch).await
        })
        .await;
    }
    Ok(Some(entry))
}

/// Statistics for one space; the period defaults to the current week.
pub fn statistics_impl(
    state: &AppState,
    space_id: String,
    period: Option<PeriodSpec>,
) -> Result<PeriodStatistics, InfraError> {
    let period = period.unwrap_or(PeriodSpec::Week { anchor: state.today() });
    let entries = state.entries_of(Some(&space_id))?;
    compute_statistics(&entries, &period).map_err(InfraError::Validation)
}

pub fn calendar_month_impl(
    state: &AppState,
    space_id: String,
    year: i32,
    month: u32,
) -> Result<CalendarMonth, InfraError> {
    let entries = state.entries_of(Some(&space_id))?;
    month_view(&entries, year, month).map_err(InfraError::Validation)
}

pub fn day_entries_impl(state: &AppState, space_id: String, date: String) -> Result<Vec<TimeEntry>, InfraError> {
    let day = parse_date(date.trim())
        .ok_or_else(|| InfraError::Validation(format!("date must be YYYY-MM-DD: {date}")))?;
    let entries = state.entries_of(Some(&space_id))?;
    Ok(entries_on(&entries, day).into_iter().cloned().collect())
}

pub fn financial_summary_impl(
    state: &AppState,
    space_id: String,
    period: PeriodSpec,
    tag: Option<String>,
    hourly_rate: f64,
) -> Result<FinancialSummary, InfraError> {
    let entries = state.entries_of(Some(&space_id))?;
    let request = FinancialRequest {
        period,
        tag: tag.as_deref().map(str::trim).filter(|tag| !tag.is_empty()),
        hourly_rate,
    };
    calculate(&entries, &request).map_err(InfraError::Validation)
}

pub fn available_tags_impl(state: &AppState, space_id: Option<String>) -> Result<Vec<String>, InfraError> {
    let entries = state.entries_of(space_id.as_deref())?;
    Ok(available_tags(&entries))
}

pub fn export_impl(state: &AppState, space_ids: Option<Vec<String>>) -> Result<ExportResponse, InfraError> {
    let snapshot = state.local.snapshot()?;
    let user_id = state.holder.user_id();
    let document = build_export(
        &snapshot.spaces,
        &snapshot.entries,
        space_ids.as_deref(),
        user_id.as_deref(),
        (state.now_provider)(),
    );
    state.log_info(
        "export",
        &format!(
            "exported {} spaces and {} entries",
            document.spaces.len(),
            document.time_entries.len()
        ),
    );
    Ok(ExportResponse {
        file_name: export_file_name(state.today()),
        document,
    })
}

/// Adds the records of a backup under fresh ids and creates them remotely
/// when signed in.
pub async fn import_impl(state: &AppState, raw: String) -> Result<ImportResponse, InfraError> {
    let batch = prepare_import(&raw, new_record_id)?;
    state.local.update(|snapshot| {
        snapshot.spaces.extend(batch.spaces.iter().cloned());
        snapshot.entries.extend(batch.entries.iter().cloned());
        Ok(())
    })?;

    let spaces = batch.spaces.clone();
    let entries = batch.entries.clone();
    write_through(state, "import", |remote, session| async move {
        for space in &spaces {
            remote.create_space(&session, space).await?;
        }
        for entry in &entries {
            remote.create_entry(&session, entry).await?;
        }
        Ok::<(), InfraError>(())
    })
    .await;

    state.notifier.success(SUCCESS_IMPORT_COMPLETE);
    state.log_info(
        "import",
        &format!("imported {} spaces and {} entries", batch.spaces.len(), batch.entries.len()),
    );
    Ok(ImportResponse {
        spaces: batch.spaces.len(),
        entries: batch.entries.len(),
        dropped_entries: batch.dropped_entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::notifications::{LOGGED_OUT_SUCCESS, SUCCESS_SYNC_COMPLETE};
    use crate::domain::models::Session;
    use crate::infrastructure::auth_client::InMemoryAuthClient;
    use crate::infrastructure::credential_store::InMemorySessionStore;
    use crate::infrastructure::local_store::RecordKind;
    use crate::infrastructure::remote_store::InMemoryRemoteStore;
    use crate::infrastructure::storage::InMemoryKeyValueStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    const EMAIL: &str = "me@example.com";
    const PASSWORD: &str = "correct horse";
    const USER: &str = "user-1";
    const OTHER_EMAIL: &str = "other@example.com";
    const OTHER_USER: &str = "user-2";

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "spacelog-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn write_config(&self, name: &str, value: serde_json::Value) {
            let config_dir = self.path.join("config");
            fs::create_dir_all(&config_dir).expect("config dir");
            fs::write(config_dir.join(name), value.to_string()).expect("write config");
        }

        fn guest_state(&self) -> AppState {
            AppState::with_parts(
                self.path.clone(),
                AppParts {
                    key_value_store: Arc::new(InMemoryKeyValueStore::default()),
                    session_store: Arc::new(InMemorySessionStore::default()),
                    cloud: None,
                },
            )
            .expect("initialize app state")
            .with_now_provider(Arc::new(fixed_now))
        }

        fn cloud_state(&self, remote: Arc<dyn RemoteStore>, session_store: Arc<InMemorySessionStore>) -> AppState {
            let auth_client = InMemoryAuthClient::new(3600);
            auth_client.register(EMAIL, PASSWORD, USER).expect("register");
            auth_client
                .register(OTHER_EMAIL, PASSWORD, OTHER_USER)
                .expect("register second account");
            AppState::with_parts(
                self.path.clone(),
                AppParts {
                    key_value_store: Arc::new(InMemoryKeyValueStore::default()),
                    session_store,
                    cloud: Some(CloudParts {
                        remote,
                        auth_client: Arc::new(auth_client),
                    }),
                },
            )
            .expect("initialize app state")
            .with_now_provider(Arc::new(fixed_now))
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 5, 10, 30, 0).single().expect("fixed time")
    }

    fn drain(receiver: &mut broadcast::Receiver<Notification>) -> Vec<String> {
        let mut keys = Vec::new();
        while let Ok(notification) = receiver.try_recv() {
            keys.push(notification.key);
        }
        keys
    }

    fn hours(value: f64) -> DurationInput {
        DurationInput::Hours { value }
    }

    fn entry_request(space_id: &str, date: &str, input: DurationInput, tags: &[&str]) -> LogEntryRequest {
        LogEntryRequest {
            space_id: space_id.to_string(),
            date: Some(date.to_string()),
            input,
            description: String::new(),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            icon: None,
        }
    }

    /// Accepts reads, rejects every write.
    struct RejectingRemoteStore;

    #[async_trait]
    impl RemoteStore for RejectingRemoteStore {
        async fn list_spaces(&self, _session: &Session) -> Result<Vec<Space>, InfraError> {
            Ok(Vec::new())
        }

        async fn create_space(&self, _session: &Session, _space: &Space) -> Result<(), InfraError> {
            Err(InfraError::Remote("remote store error: http 403".to_string()))
        }

        async fn update_space(&self, _session: &Session, _id: &str, _patch: &SpacePatch) -> Result<(), InfraError> {
            Err(InfraError::Remote("remote store error: http 403".to_string()))
        }

        async fn delete_space(&self, _session: &Session, _id: &str) -> Result<(), InfraError> {
            Err(InfraError::Remote("remote store error: http 403".to_string()))
        }

        async fn upsert_space(&self, _session: &Session, _space: &Space) -> Result<(), InfraError> {
            Err(InfraError::Remote("remote store error: http 403".to_string()))
        }

        async fn list_entries(&self, _session: &Session) -> Result<Vec<TimeEntry>, InfraError> {
            Ok(Vec::new())
        }

        async fn create_entry(&self, _session: &Session, _entry: &TimeEntry) -> Result<(), InfraError> {
            Err(InfraError::Remote("remote store error: http 403".to_string()))
        }

        async fn update_entry(
            &self,
            _session: &Session,
            _id: &str,
            _patch: &TimeEntryPatch,
        ) -> Result<(), InfraError> {
            Err(InfraError::Remote("remote store error: http 403".to_string()))
        }

        async fn delete_entry(&self, _session: &Session, _id: &str) -> Result<(), InfraError> {
            Err(InfraError::Remote("remote store error: http 403".to_string()))
        }

        async fn upsert_entry(&self, _session: &Session, _entry: &TimeEntry) -> Result<(), InfraError> {
            Err(InfraError::Remote("remote store error: http 403".to_string()))
        }
    }

    #[tokio::test]
    async fn create_space_rejects_empty_name() {
        let workspace = TempWorkspace::new();
        let state = workspace.guest_state();
        let result = create_space_impl(&state, "   ".to_string(), "#000000".to_string(), None).await;
        assert!(matches!(result, Err(InfraError::Validation(_))));
        assert!(list_spaces_impl(&state).expect("list").is_empty());
    }

    #[tokio::test]
    async fn guest_can_create_log_and_list() {
        let workspace = TempWorkspace::new();
        let state = workspace.guest_state();

        let space = create_space_impl(&state, " Design ".to_string(), "#3366ff".to_string(), None)
            .await
            .expect("create space");
        assert_eq!(space.name, "Design");

        let entry = log_entry_impl(
            &state,
            entry_request(&space.id, "2024-06-03", DurationInput::Text { value: "1:30".to_string() }, &[" ui ", "ui", ""]),
        )
        .await
        .expect("log entry");
        assert_eq!(entry.duration, 1.5);
        assert_eq!(entry.tags, vec!["ui".to_string()]);

        let listed = list_entries_impl(&state, Some(space.id.clone())).expect("list entries");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].display, "1:30");
        assert_eq!(session_impl(&state).authenticated, false);
    }

    #[tokio::test]
    async fn log_entry_validates_input_before_writing() {
        let workspace = TempWorkspace::new();
        let state = workspace.guest_state();
        let space = create_space_impl(&state, "Work".to_string(), "#000000".to_string(), None)
            .await
            .expect("create space");

        let zero = log_entry_impl(&state, entry_request(&space.id, "2024-06-03", hours(0.0), &[])).await;
        assert!(matches!(zero, Err(InfraError::Validation(_))));

        let backwards = log_entry_impl(
            &state,
            entry_request(
                &space.id,
                "2024-06-03",
                DurationInput::Range {
                    start: "10:00".to_string(),
                    end: "09:00".to_string(),
                },
                &[],
            ),
        )
        .await;
        assert!(matches!(backwards, Err(InfraError::Validation(_))));

        let unknown_space = log_entry_impl(&state, entry_request("missing", "2024-06-03", hours(1.0), &[])).await;
        assert!(matches!(unknown_space, Err(InfraError::Validation(_))));

        assert!(list_entries_impl(&state, None).expect("list").is_empty());
    }

    #[tokio::test]
    async fn log_entry_defaults_to_today_in_configured_timezone() {
        let workspace = TempWorkspace::new();
        workspace.write_config(
            "app.json",
            serde_json::json!({"schema": 1, "appName": "Spacelog", "timezone": "Pacific/Kiritimati"}),
        );
        let state = workspace.guest_state();
        let space = create_space_impl(&state, "Work".to_string(), "#000000".to_string(), None)
            .await
            .expect("create space");

        let mut request = entry_request(&space.id, "", hours(1.0), &[]);
        request.date = None;
        let entry = log_entry_impl(&state, request).await.expect("log entry");

        // 10:30 UTC is already the next day at UTC+14
        assert_eq!(entry.date, "2024-06-06");
    }

    #[tokio::test]
    async fn unknown_ids_are_silent_no_ops() {
        let workspace = TempWorkspace::new();
        let state = workspace.guest_state();

        let patch = SpacePatch {
            name: Some("Renamed".to_string()),
            ..SpacePatch::default()
        };
        assert_eq!(update_space_impl(&state, "missing".to_string(), patch).await.expect("update"), None);
        assert!(!delete_space_impl(&state, "missing".to_string()).await.expect("delete"));
        assert_eq!(
            update_entry_impl(&state, "missing".to_string(), TimeEntryPatch::default())
                .await
                .expect("update entry"),
            None
        );
        assert!(!delete_entry_impl(&state, "missing".to_string()).await.expect("delete entry"));
        assert_eq!(stop_entry_impl(&state, "missing".to_string()).await.expect("stop"), None);
    }

    #[tokio::test]
    async fn update_entry_rejects_invalid_result() {
        let workspace = TempWorkspace::new();
        let state = workspace.guest_state();
        let space = create_space_impl(&state, "Work".to_string(), "#000000".to_string(), None)
            .await
            .expect("create space");
        let entry = log_entry_impl(&state, entry_request(&space.id, "2024-06-03", hours(2.0), &[]))
            .await
            .expect("log entry");

        let patch = TimeEntryPatch {
            duration: Some(0.0),
            ..TimeEntryPatch::default()
        };
        assert!(matches!(
            update_entry_impl(&state, entry.id.clone(), patch).await,
            Err(InfraError::Validation(_))
        ));
        let stored = list_entries_impl(&state, None).expect("list");
        assert_eq!(stored[0].entry.duration, 2.0);
    }

    #[tokio::test]
    async fn delete_space_cascades_to_its_entries() {
        let workspace = TempWorkspace::new();
        let state = workspace.guest_state();
        let keep = create_space_impl(&state, "Keep".to_string(), "#000000".to_string(), None)
            .await
            .expect("create space");
        let drop = create_space_impl(&state, "Drop".to_string(), "#ffffff".to_string(), None)
            .await
            .expect("create space");
        log_entry_impl(&state, entry_request(&keep.id, "2024-06-03", hours(1.0), &[]))
            .await
            .expect("log entry");
        log_entry_impl(&state, entry_request(&drop.id, "2024-06-03", hours(1.0), &[]))
            .await
            .expect("log entry");

        assert!(delete_space_impl(&state, drop.id.clone()).await.expect("delete"));

        let entries = list_entries_impl(&state, None).expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry.space_id, keep.id);
    }

    #[tokio::test]
    async fn stop_entry_finishes_running_recording() {
        let workspace = TempWorkspace::new();
        let state = workspace.guest_state();
        let space = create_space_impl(&state, "Work".to_string(), "#000000".to_string(), None)
            .await
            .expect("create space");
        let running = log_entry_impl(
            &state,
            entry_request(
                &space.id,
                "2024-06-05",
                DurationInput::Ongoing {
                    start: "09:00".to_string(),
                },
                &[],
            ),
        )
        .await
        .expect("start recording");

        let listed = list_entries_impl(&state, None).expect("list");
        assert_eq!(listed[0].display, "1:30");

        let stopped = stop_entry_impl(&state, running.id.clone())
            .await
            .expect("stop")
            .expect("entry");
        assert_eq!(stopped.duration, 1.5);
        assert_eq!(stopped.end_time.as_deref(), Some("10:30"));
        assert!(!stopped.is_ongoing());
    }

    #[tokio::test]
    async fn statistics_and_financials_cover_the_requested_period() {
        let workspace = TempWorkspace::new();
        let state = workspace.guest_state();
        let space = create_space_impl(&state, "Studio".to_string(), "#000000".to_string(), None)
            .await
            .expect("create space");
        log_entry_impl(&state, entry_request(&space.id, "2024-06-03", hours(5.0), &["Design"]))
            .await
            .expect("log entry");
        log_entry_impl(&state, entry_request(&space.id, "2024-06-09", hours(3.0), &["Design"]))
            .await
            .expect("log entry");

        let statistics = statistics_impl(&state, space.id.clone(), None).expect("statistics");
        assert_eq!(statistics.total_hours, 8.0);
        assert_eq!(statistics.daily.len(), 7);

        let summary = financial_summary_impl(
            &state,
            space.id.clone(),
            PeriodSpec::Week {
                anchor: NaiveDate::from_ymd_opt(2024, 6, 5).expect("date"),
            },
            Some("Design".to_string()),
            50.0,
        )
        .expect("financial summary");
        assert_eq!(summary.earnings, Some(400.0));
        assert_eq!(available_tags_impl(&state, Some(space.id.clone())).expect("tags"), vec!["Design".to_string()]);

        let month = calendar_month_impl(&state, space.id.clone(), 2024, 6).expect("calendar");
        assert_eq!(month.day_count(), 30);
        assert_eq!(month.leading_blanks, 5);
        assert_eq!(
            day_entries_impl(&state, space.id, "2024-06-09".to_string())
                .expect("day entries")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn export_then_import_adds_copies_under_new_ids() {
        let workspace = TempWorkspace::new();
        let state = workspace.guest_state();
        let mut notifications = state.subscribe_notifications();
        let space = create_space_impl(&state, "Work".to_string(), "#000000".to_string(), None)
            .await
            .expect("create space");
        log_entry_impl(&state, entry_request(&space.id, "2024-06-03", hours(1.0), &[]))
            .await
            .expect("log entry");

        let exported = export_impl(&state, None).expect("export");
        assert_eq!(exported.file_name, "spacelog_backup_2024-06-05.json");
        assert_eq!(exported.document.metadata.user_id, None);

        let raw = serde_json::to_string(&exported.document).expect("serialize");
        let imported = import_impl(&state, raw).await.expect("import");
        assert_eq!(imported.spaces, 1);
        assert_eq!(imported.entries, 1);

        let spaces = list_spaces_impl(&state).expect("spaces");
        assert_eq!(spaces.len(), 2);
        assert_ne!(spaces[0].id, spaces[1].id);
        let entries = list_entries_impl(&state, Some(spaces[1].id.clone())).expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(drain(&mut notifications), vec![SUCCESS_IMPORT_COMPLETE.to_string()]);
    }

    #[tokio::test]
    async fn guest_mode_cannot_sign_in_and_never_syncs() {
        let workspace = TempWorkspace::new();
        let state = workspace.guest_state();

        assert!(matches!(
            sign_in_impl(&state, EMAIL.to_string(), PASSWORD.to_string()).await,
            Err(InfraError::InvalidConfig(_))
        ));
        assert_eq!(
            sync_now_impl(&state).await.expect("sync"),
            SyncResponse::Skipped {
                reason: "signed_out".to_string()
            }
        );
    }

    #[tokio::test]
    async fn sign_in_merges_guest_data_and_sign_out_clears_it() {
        let workspace = TempWorkspace::new();
        let remote = Arc::new(InMemoryRemoteStore::default());
        let state = workspace.cloud_state(
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::new(InMemorySessionStore::default()),
        );
        let mut notifications = state.subscribe_notifications();

        let space = create_space_impl(&state, "Offline".to_string(), "#000000".to_string(), None)
            .await
            .expect("create space");
        log_entry_impl(&state, entry_request(&space.id, "2024-06-03", hours(2.0), &[]))
            .await
            .expect("log entry");

        let response = sign_in_impl(&state, EMAIL.to_string(), PASSWORD.to_string())
            .await
            .expect("sign in");
        assert!(response.session.authenticated);
        assert!(matches!(response.sync, SyncResponse::Completed { ref report } if report.first_pass));
        assert_eq!(remote.spaces_for(USER).expect("remote spaces"), vec![space.clone()]);
        assert_eq!(remote.entries_for(USER).expect("remote entries").len(), 1);

        let view = sign_out_impl(&state).await.expect("sign out");
        assert!(!view.authenticated);
        assert!(list_spaces_impl(&state).expect("spaces").is_empty());
        assert!(list_entries_impl(&state, None).expect("entries").is_empty());
        assert!(state.local.load_ledger(RecordKind::Space).expect("ledger").is_empty());
        assert_eq!(
            drain(&mut notifications),
            vec![SUCCESS_SYNC_COMPLETE.to_string(), LOGGED_OUT_SUCCESS.to_string()]
        );
    }

    #[tokio::test]
    async fn switching_accounts_never_carries_data_across() {
        let workspace = TempWorkspace::new();
        let remote = Arc::new(InMemoryRemoteStore::default());
        let state = workspace.cloud_state(
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::new(InMemorySessionStore::default()),
        );
        let mut notifications = state.subscribe_notifications();

        sign_in_impl(&state, EMAIL.to_string(), PASSWORD.to_string())
            .await
            .expect("sign in first account");
        let private = create_space_impl(&state, "Private".to_string(), "#000000".to_string(), None)
            .await
            .expect("create space");
        log_entry_impl(&state, entry_request(&private.id, "2024-06-03", hours(1.0), &[]))
            .await
            .expect("log entry");
        assert!(matches!(sync_now_impl(&state).await.expect("sync"), SyncResponse::Completed { .. }));

        let response = sign_in_impl(&state, OTHER_EMAIL.to_string(), PASSWORD.to_string())
            .await
            .expect("sign in second account");

        assert_eq!(response.session.user_id.as_deref(), Some(OTHER_USER));
        assert!(matches!(response.sync, SyncResponse::Completed { ref report } if report.first_pass));
        assert!(list_spaces_impl(&state).expect("spaces").is_empty());
        assert!(list_entries_impl(&state, None).expect("entries").is_empty());
        assert!(state.local.load_ledger(RecordKind::Space).expect("ledger").is_empty());
        assert!(state.local.load_ledger(RecordKind::Entry).expect("ledger").is_empty());
        assert!(remote.spaces_for(OTHER_USER).expect("remote").is_empty());
        assert!(remote.entries_for(OTHER_USER).expect("remote").is_empty());
        assert_eq!(remote.spaces_for(USER).expect("remote"), vec![private]);
        assert!(!drain(&mut notifications).iter().any(|key| key == LOGGED_OUT_SUCCESS));
    }

    #[tokio::test]
    async fn signed_in_writes_go_through_to_remote() {
        let workspace = TempWorkspace::new();
        let remote = Arc::new(InMemoryRemoteStore::default());
        let state = workspace.cloud_state(
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::new(InMemorySessionStore::default()),
        );
        sign_in_impl(&state, EMAIL.to_string(), PASSWORD.to_string())
            .await
            .expect("sign in");

        let space = create_space_impl(&state, "Client".to_string(), "#123456".to_string(), None)
            .await
            .expect("create space");
        let patch = SpacePatch {
            name: Some("Client A".to_string()),
            ..SpacePatch::default()
        };
        update_space_impl(&state, space.id.clone(), patch)
            .await
            .expect("update space");
        assert_eq!(remote.spaces_for(USER).expect("remote")[0].name, "Client A");

        assert!(delete_space_impl(&state, space.id).await.expect("delete"));
        assert!(remote.spaces_for(USER).expect("remote").is_empty());
    }

    #[tokio::test]
    async fn failed_remote_write_keeps_local_change_and_notifies() {
        let workspace = TempWorkspace::new();
        let state = workspace.cloud_state(Arc::new(RejectingRemoteStore), Arc::new(InMemorySessionStore::default()));
        sign_in_impl(&state, EMAIL.to_string(), PASSWORD.to_string())
            .await
            .expect("sign in");
        let mut notifications = state.subscribe_notifications();

        let space = create_space_impl(&state, "Kept".to_string(), "#000000".to_string(), None)
            .await
            .expect("create space");

        assert_eq!(list_spaces_impl(&state).expect("spaces"), vec![space]);
        assert_eq!(drain(&mut notifications), vec![ERROR_SAVE_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn restore_signs_in_from_stored_session() {
        let workspace = TempWorkspace::new();
        let remote = Arc::new(InMemoryRemoteStore::default());
        remote
            .seed(
                USER,
                vec![Space {
                    id: "remote-space".to_string(),
                    name: "Remote".to_string(),
                    color: "#000000".to_string(),
                    icon: None,
                }],
                Vec::new(),
            )
            .expect("seed");
        let session_store = Arc::new(InMemorySessionStore::default());
        session_store
            .save_session(&Session {
                user_id: USER.to_string(),
                email: Some(EMAIL.to_string()),
                access_token: "stored-access".to_string(),
                refresh_token: None,
                expires_at: fixed_now() + chrono::Duration::hours(1),
            })
            .expect("save session");
        let state = workspace.cloud_state(Arc::clone(&remote) as Arc<dyn RemoteStore>, session_store);

        let response = restore_session_impl(&state).await.expect("restore");

        assert_eq!(response.session.user_id.as_deref(), Some(USER));
        assert!(matches!(response.sync, SyncResponse::Completed { .. }));
        assert_eq!(list_spaces_impl(&state).expect("spaces").len(), 1);
    }

    #[tokio::test]
    async fn foreground_sync_respects_configuration() {
        let workspace = TempWorkspace::new();
        workspace.write_config(
            "sync.json",
            serde_json::json!({"schema": 1, "intervalSeconds": 300, "syncOnForeground": false}),
        );
        let state = workspace.cloud_state(
            Arc::new(InMemoryRemoteStore::default()),
            Arc::new(InMemorySessionStore::default()),
        );
        sign_in_impl(&state, EMAIL.to_string(), PASSWORD.to_string())
            .await
            .expect("sign in");

        assert_eq!(
            foreground_impl(&state).await.expect("foreground"),
            SyncResponse::Skipped {
                reason: "disabled".to_string()
            }
        );
    }

    #[tokio::test]
    async fn going_offline_is_reported_and_blocks_sync() {
        let workspace = TempWorkspace::new();
        let state = workspace.cloud_state(
            Arc::new(InMemoryRemoteStore::default()),
            Arc::new(InMemorySessionStore::default()),
        );
        sign_in_impl(&state, EMAIL.to_string(), PASSWORD.to_string())
            .await
            .expect("sign in");
        let mut notifications = state.subscribe_notifications();

        set_online_impl(&state, false);
        set_online_impl(&state, false);
        assert_eq!(sync_now_impl(&state).await.expect("sync"), SyncResponse::Offline);
        set_online_impl(&state, true);

        assert_eq!(
            drain(&mut notifications),
            vec![
                ERROR_NETWORK_OFFLINE.to_string(),
                ERROR_NETWORK_OFFLINE.to_string(),
                INFO_NETWORK_ONLINE.to_string()
            ]
        );
        assert_eq!(
            sync_status_impl(&state).last_outcome,
            Some(crate::application::data_sync::LastOutcome::Offline)
        );
    }
}

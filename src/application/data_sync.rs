use crate::application::notifications::{
    NotificationSink, ERROR_NETWORK_OFFLINE, ERROR_SYNC_FAILED, LOGGED_OUT_SUCCESS, SUCCESS_SYNC_COMPLETE,
};
use crate::application::session::{NowProvider, SessionHolder};
use crate::domain::models::{Session, Space, SyncRecord, TimeEntry};
use crate::infrastructure::connectivity::Connectivity;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::{LocalRepository, LocalSnapshot, RecordKind};
use crate::infrastructure::remote_store::RemoteStore;
use crate::infrastructure::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Login,
    Manual,
    Foreground,
    Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SignedOut,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub first_pass: bool,
    pub spaces_uploaded: usize,
    pub spaces_removed: usize,
    pub entries_uploaded: usize,
    pub entries_removed: usize,
    pub orphans_pruned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Skipped(SkipReason),
    Offline,
    Completed(SyncReport),
    /// The identity changed while the pass was running; nothing was written.
    Discarded,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Syncing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LastOutcome {
    Success,
    Offline,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub last_outcome: Option<LastOutcome>,
    pub last_finished_at: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            last_outcome: None,
            last_finished_at: None,
        }
    }
}

/// Result of reconciling one record kind against the remote listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan<T> {
    pub to_upload: Vec<T>,
    pub to_delete_locally: Vec<String>,
    pub final_set: Vec<T>,
}

impl<T: SyncRecord> ReconcilePlan<T> {
    pub fn ledger(&self) -> BTreeSet<String> {
        ids_of(&self.final_set)
    }
}

/// Local records confirmed synced earlier but now missing remotely are
/// dropped; local records never confirmed and missing remotely are uploaded.
/// The result is the remote listing followed by the uploads.
pub fn reconcile<T: SyncRecord>(local: &[T], remote: &[T], known: &BTreeSet<String>) -> ReconcilePlan<T> {
    let remote_ids = ids_of(remote);
    let mut to_upload = Vec::new();
    let mut to_delete_locally = Vec::new();

    for record in local {
        let id = record.record_id();
        if remote_ids.contains(id) {
            continue;
        }
        if known.contains(id) {
            to_delete_locally.push(id.to_string());
        } else {
            to_upload.push(record.clone());
        }
    }

    let mut final_set = remote.to_vec();
    final_set.extend(to_upload.iter().cloned());
    ReconcilePlan {
        to_upload,
        to_delete_locally,
        final_set,
    }
}

/// Re-applies local changes made while a pass was waiting on the network.
/// Returns the merged records and the ids added locally in the meantime,
/// which have not been uploaded yet.
fn overlay_local_changes<T: SyncRecord>(merged: Vec<T>, before: &[T], current: &[T]) -> (Vec<T>, BTreeSet<String>) {
    let before_by_id: HashMap<&str, &T> = before.iter().map(|record| (record.record_id(), record)).collect();
    let current_by_id: HashMap<&str, &T> = current.iter().map(|record| (record.record_id(), record)).collect();

    let mut result: Vec<T> = merged
        .into_iter()
        .filter_map(|record| {
            let id = record.record_id();
            match (before_by_id.get(id), current_by_id.get(id)) {
                (Some(_), None) => None,
                (Some(old), Some(new)) if old != new => Some((*new).clone()),
                _ => Some(record),
            }
        })
        .collect();

    let merged_ids = ids_of(&result);
    let mut unsynced = BTreeSet::new();
    for record in current {
        let id = record.record_id();
        if before_by_id.contains_key(id) {
            continue;
        }
        match result.iter().position(|existing| existing.record_id() == id) {
            Some(index) => result[index] = record.clone(),
            None => {
                result.push(record.clone());
                if !merged_ids.contains(id) {
                    unsynced.insert(id.to_string());
                }
            }
        }
    }
    (result, unsynced)
}

fn ids_of<T: SyncRecord>(records: &[T]) -> BTreeSet<String> {
    records.iter().map(|record| record.record_id().to_string()).collect()
}

fn prune_orphans(entries: &mut Vec<TimeEntry>, spaces: &[Space]) -> usize {
    let space_ids = ids_of(spaces);
    let before = entries.len();
    entries.retain(|entry| space_ids.contains(&entry.space_id));
    before - entries.len()
}

fn sort_newest_first(entries: &mut [TimeEntry]) {
    entries.sort_by(|left, right| right.date.cmp(&left.date));
}

/// Runs every upload concurrently, waits for all of them and reports the
/// first failure.
async fn upload_all<T, F, Fut>(records: &[T], upload: F) -> Result<(), InfraError>
where
    T: SyncRecord,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), InfraError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for record in records.iter().cloned() {
        tasks.spawn(upload(record));
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(|error| InfraError::Remote(format!("upload task failed: {error}")))
            .and_then(|result| result);
        if let Err(error) = result {
            warn!(%error, "upload failed");
            first_error.get_or_insert(error);
        }
    }
    first_error.map_or(Ok(()), Err)
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct DataSyncService<R, K, N>
where
    R: RemoteStore + ?Sized,
    K: KeyValueStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    remote: Arc<R>,
    local: Arc<LocalRepository<K>>,
    session: Arc<SessionHolder>,
    connectivity: Arc<dyn Connectivity>,
    notifier: Arc<N>,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
    in_flight: AtomicBool,
    first_pass_completed: AtomicBool,
    session_epoch: AtomicU64,
    status: Mutex<SyncStatus>,
}

impl<R, K, N> DataSyncService<R, K, N>
where
    R: RemoteStore + ?Sized + 'static,
    K: KeyValueStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    pub fn new(
        remote: Arc<R>,
        local: Arc<LocalRepository<K>>,
        session: Arc<SessionHolder>,
        connectivity: Arc<dyn Connectivity>,
        notifier: Arc<N>,
    ) -> Self {
        Self {
            remote,
            local,
            session,
            connectivity,
            notifier,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
            in_flight: AtomicBool::new(false),
            first_pass_completed: AtomicBool::new(false),
            session_epoch: AtomicU64::new(0),
            status: Mutex::new(SyncStatus::default()),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn has_completed_first_pass(&self) -> bool {
        self.first_pass_completed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SyncStatus {
        self.status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_default()
    }

    /// A new identity starts with union-merge semantics until one pass
    /// succeeds.
    pub fn handle_sign_in(&self) {
        self.session_epoch.fetch_add(1, Ordering::SeqCst);
        self.first_pass_completed.store(false, Ordering::SeqCst);
    }

    /// A different account signed in: invalidates any running pass, then
    /// removes the previous account's records and ledgers.
    pub fn handle_account_change(&self) -> Result<(), InfraError> {
        self.session_epoch.fetch_add(1, Ordering::SeqCst);
        self.first_pass_completed.store(false, Ordering::SeqCst);
        self.local.clear_all()?;
        info!("local data cleared after account change");
        Ok(())
    }

    /// Removes every account-owned record and both ledgers from the device.
    pub fn handle_sign_out(&self) -> Result<(), InfraError> {
        self.session_epoch.fetch_add(1, Ordering::SeqCst);
        self.first_pass_completed.store(false, Ordering::SeqCst);
        self.local.clear_all()?;
        info!("local data cleared after sign out");
        self.notifier.info(LOGGED_OUT_SUCCESS);
        Ok(())
    }

    pub async fn run_pass(&self, trigger: SyncTrigger) -> PassOutcome {
        let Some(session) = self.session.current() else {
            debug!(?trigger, "sync skipped: no session");
            return PassOutcome::Skipped(SkipReason::SignedOut);
        };
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(?trigger, "sync skipped: pass already running");
            return PassOutcome::Skipped(SkipReason::AlreadyRunning);
        }
        let _guard = InFlightGuard(&self.in_flight);

        if !self.connectivity.is_online() {
            warn!(?trigger, "sync aborted: offline");
            self.notifier.error(ERROR_NETWORK_OFFLINE);
            self.finish(LastOutcome::Offline);
            return PassOutcome::Offline;
        }

        self.set_phase(SyncPhase::Syncing);
        let epoch = self.session_epoch.load(Ordering::SeqCst);
        let first_pass = !self.first_pass_completed.load(Ordering::SeqCst);
        info!(?trigger, first_pass, user_id = %session.user_id, "sync pass started");

        match self.execute(&session, trigger, first_pass, epoch).await {
            Ok(Some(report)) => {
                self.first_pass_completed.store(true, Ordering::SeqCst);
                info!(
                    spaces_uploaded = report.spaces_uploaded,
                    spaces_removed = report.spaces_removed,
                    entries_uploaded = report.entries_uploaded,
                    entries_removed = report.entries_removed,
                    orphans_pruned = report.orphans_pruned,
                    "sync pass completed"
                );
                self.notifier.success(SUCCESS_SYNC_COMPLETE);
                self.finish(LastOutcome::Success);
                PassOutcome::Completed(report)
            }
            Ok(None) => {
                info!("sync pass discarded after identity change");
                self.set_phase(SyncPhase::Idle);
                PassOutcome::Discarded
            }
            Err(error) => {
                warn!(%error, "sync pass failed");
                self.notifier.error(ERROR_SYNC_FAILED);
                self.finish(LastOutcome::Failed);
                PassOutcome::Failed(error.to_string())
            }
        }
    }

    async fn execute(
        &self,
        session: &Session,
        trigger: SyncTrigger,
        first_pass: bool,
        epoch: u64,
    ) -> Result<Option<SyncReport>, InfraError> {
        let before = self.local.snapshot()?;
        let remote_spaces = self
            .list_with_retry(RecordKind::Space, || self.remote.list_spaces(session))
            .await?;
        let remote_entries = self
            .list_with_retry(RecordKind::Entry, || self.remote.list_entries(session))
            .await?;

        let (known_spaces, known_entries) = if first_pass {
            (BTreeSet::new(), BTreeSet::new())
        } else {
            (
                self.local.load_ledger(RecordKind::Space)?,
                self.local.load_ledger(RecordKind::Entry)?,
            )
        };

        let space_plan = reconcile(&before.spaces, &remote_spaces, &known_spaces);
        let surviving_spaces = ids_of(&space_plan.final_set);
        let local_entries: Vec<TimeEntry> = before
            .entries
            .iter()
            .filter(|entry| surviving_spaces.contains(&entry.space_id))
            .cloned()
            .collect();
        let entry_plan = reconcile(&local_entries, &remote_entries, &known_entries);

        let remote = Arc::clone(&self.remote);
        let upload_session = session.clone();
        upload_all(&space_plan.to_upload, move |space: Space| {
            let remote = Arc::clone(&remote);
            let session = upload_session.clone();
            async move { remote.upsert_space(&session, &space).await }
        })
        .await?;

        let remote = Arc::clone(&self.remote);
        let upload_session = session.clone();
        upload_all(&entry_plan.to_upload, move |entry: TimeEntry| {
            let remote = Arc::clone(&remote);
            let session = upload_session.clone();
            async move { remote.upsert_entry(&session, &entry).await }
        })
        .await?;

        let mut report = SyncReport {
            trigger,
            first_pass,
            spaces_uploaded: space_plan.to_upload.len(),
            spaces_removed: space_plan.to_delete_locally.len(),
            entries_uploaded: entry_plan.to_upload.len(),
            entries_removed: entry_plan.to_delete_locally.len(),
            orphans_pruned: before.entries.len() - local_entries.len(),
        };

        let committed = self.local.commit_merge(|current| {
            if self.session_epoch.load(Ordering::SeqCst) != epoch {
                return Err(InfraError::Unauthenticated);
            }
            let (ledgers, orphans) = Self::merge_into(current, &before, space_plan, entry_plan);
            report.orphans_pruned += orphans;
            Ok(((), ledgers.0, ledgers.1))
        });

        match committed {
            Ok(()) => Ok(Some(report)),
            Err(InfraError::Unauthenticated) if self.session_epoch.load(Ordering::SeqCst) != epoch => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn merge_into(
        current: &mut LocalSnapshot,
        before: &LocalSnapshot,
        space_plan: ReconcilePlan<Space>,
        entry_plan: ReconcilePlan<TimeEntry>,
    ) -> ((BTreeSet<String>, BTreeSet<String>), usize) {
        let (spaces, unsynced_spaces) = overlay_local_changes(space_plan.final_set, &before.spaces, &current.spaces);
        let (mut entries, unsynced_entries) =
            overlay_local_changes(entry_plan.final_set, &before.entries, &current.entries);
        let orphans = prune_orphans(&mut entries, &spaces);
        sort_newest_first(&mut entries);

        let space_ledger = ids_of(&spaces).difference(&unsynced_spaces).cloned().collect();
        let entry_ledger = ids_of(&entries).difference(&unsynced_entries).cloned().collect();
        current.spaces = spaces;
        current.entries = entries;
        ((space_ledger, entry_ledger), orphans)
    }

    async fn list_with_retry<T, F, Fut>(&self, kind: RecordKind, list: F) -> Result<Vec<T>, InfraError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<T>, InfraError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match list().await {
                Ok(records) => return Ok(records),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    debug!(kind = kind.label(), attempt, delay, %error, "retrying remote listing");
                    sleep(Duration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        if let Ok(mut status) = self.status.lock() {
            status.phase = phase;
        }
    }

    fn finish(&self, outcome: LastOutcome) {
        if let Ok(mut status) = self.status.lock() {
            status.phase = SyncPhase::Idle;
            status.last_outcome = Some(outcome);
            status.last_finished_at = Some((self.now_provider)());
        }
    }
}

/// Calls `tick` every `period`, starting one period from now.
pub fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            tick().await;
        }
    })
}

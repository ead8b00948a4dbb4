//! One-time historical backfill for an account.
//!
//! The plan is a flat list of [`InitTask`]s grouped by phase: `hot_data`
//! (recent days in small chunks across every hot channel), `cold_data` (older
//! days in large chunks across fewer channels) and optionally
//! `structure_data` (one task per entity type). Phases run in that order.
//! Each task runs as its own sync job and is retried on transient failure up
//! to `max_task_attempts`.
//!
//! When every task has completed the account moves to incremental mode. That
//! move is one-way: a forced restart rebuilds the plan but keeps the account
//! incremental.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::InitializationConfig;
use crate::error::{AdpilotError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::store::{Store, ACCOUNT_SYNC, INIT_TASKS};
use crate::sync_job::{DateWindow, JobTrigger, SyncExecutor, SyncJob};
use crate::types::{ErrorKind, InitPhase, JobStatus, SyncType};
use crate::tz::{local_date, TimezoneResolver};

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Backfill,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    Planned,
    Running,
    Completed,
    /// Attempts exhausted with failed tasks left; resume with retry.
    Failed,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Backfill => "backfill",
            SyncMode::Incremental => "incremental",
        }
    }
}

impl InitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InitStatus::Planned => "planned",
            InitStatus::Running => "running",
            InitStatus::Completed => "completed",
            InitStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for InitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSyncState {
    pub account_id: String,
    pub mode: SyncMode,
    pub status: InitStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub incremental_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitTask {
    pub id: String,
    pub account_id: String,
    pub phase: InitPhase,
    pub sync_type: SyncType,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub window: Option<DateWindow>,
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        })
    }
}

impl InitTask {
    fn key(&self) -> String {
        task_key(&self.account_id, &self.id)
    }
}

fn task_key(account_id: &str, task_id: &str) -> String {
    format!("{account_id}/{task_id}")
}

fn phase_index(phase: InitPhase) -> u8 {
    match phase {
        InitPhase::HotData => 0,
        InitPhase::ColdData => 1,
        InitPhase::StructureData => 2,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase: InitPhase,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializationProgress {
    pub account_id: String,
    pub mode: SyncMode,
    pub status: InitStatus,
    pub phases: Vec<PhaseProgress>,
    pub overall_progress: f64,
    #[serde(default)]
    pub estimated_time_remaining_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Split days `first..=last` back from `today` into windows of `chunk` days,
/// newest first.
fn windows(today: NaiveDate, first: u32, last: u32, chunk: u32) -> Vec<DateWindow> {
    let chunk = chunk.max(1);
    let mut out = Vec::new();
    let mut offset = first;
    while offset <= last {
        let end_offset = (offset + chunk - 1).min(last);
        out.push(DateWindow {
            start: today - Duration::days(end_offset as i64),
            end: today - Duration::days(offset as i64),
        });
        offset = end_offset + 1;
    }
    out
}

/// Every task of a fresh backfill for `account_id`, in execution order.
pub fn build_plan(account_id: &str, today: NaiveDate, cfg: &InitializationConfig) -> Vec<InitTask> {
    let mut tasks = Vec::new();
    let mut push = |phase: InitPhase, sync_type, channel: Option<String>, window| {
        let seq = tasks.len();
        tasks.push(InitTask {
            id: format!("{}-{:04}", phase_index(phase), seq),
            account_id: account_id.to_string(),
            phase,
            sync_type,
            channel,
            window,
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            job_id: None,
            started_at: None,
            completed_at: None,
        });
    };

    if cfg.hot_days > 0 {
        for w in windows(today, 0, cfg.hot_days - 1, cfg.hot_chunk_days) {
            for c in &cfg.hot_channels {
                push(InitPhase::HotData, SyncType::Performance, Some(c.clone()), Some(w));
            }
        }
    }
    if cfg.cold_start_day <= cfg.cold_end_day {
        for w in windows(today, cfg.cold_start_day, cfg.cold_end_day, cfg.cold_chunk_days) {
            for c in &cfg.cold_channels {
                push(InitPhase::ColdData, SyncType::Performance, Some(c.clone()), Some(w));
            }
        }
    }
    if cfg.include_structure {
        for t in &cfg.structure_types {
            push(InitPhase::StructureData, *t, None, None);
        }
    }
    tasks
}

fn progress_of(
    account_id: &str,
    state: &AccountSyncState,
    tasks: &[InitTask],
    concurrency: usize,
) -> InitializationProgress {
    let mut phases = Vec::new();
    for phase in InitPhase::all() {
        let of_phase: Vec<_> = tasks.iter().filter(|t| t.phase == *phase).collect();
        if of_phase.is_empty() {
            continue;
        }
        let total = of_phase.len() as u32;
        let completed = of_phase
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count() as u32;
        let failed = of_phase
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count() as u32;
        phases.push(PhaseProgress {
            phase: *phase,
            total_tasks: total,
            completed_tasks: completed,
            failed_tasks: failed,
            progress_percent: completed as f64 * 100.0 / total as f64,
        });
    }

    let total: u32 = phases.iter().map(|p| p.total_tasks).sum();
    let completed: u32 = phases.iter().map(|p| p.completed_tasks).sum();
    let overall = if total == 0 {
        100.0
    } else {
        completed as f64 * 100.0 / total as f64
    };

    let durations: Vec<i64> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .filter_map(|t| Some((t.completed_at? - t.started_at?).num_seconds()))
        .collect();
    let remaining = (total - completed) as u64;
    let eta = if remaining == 0 {
        Some(0)
    } else if durations.is_empty() {
        None
    } else {
        let avg = durations.iter().sum::<i64>().max(0) as u64 / durations.len() as u64;
        Some(avg * remaining / concurrency.max(1) as u64)
    };

    InitializationProgress {
        account_id: account_id.to_string(),
        mode: state.mode,
        status: state.status,
        phases,
        overall_progress: overall,
        estimated_time_remaining_secs: eta,
    }
}

// ---------------------------------------------------------------------------
// Initializer
// ---------------------------------------------------------------------------

pub struct Initializer {
    store: Arc<Store>,
    executor: Arc<SyncExecutor>,
    timezones: Arc<dyn TimezoneResolver>,
    cfg: InitializationConfig,
    events: EventSink,
}

impl Initializer {
    pub fn new(
        store: Arc<Store>,
        executor: Arc<SyncExecutor>,
        timezones: Arc<dyn TimezoneResolver>,
        cfg: InitializationConfig,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            executor,
            timezones,
            cfg,
            events,
        }
    }

    pub fn state(&self, account_id: &str) -> Result<Option<AccountSyncState>> {
        self.store.get(ACCOUNT_SYNC, account_id)
    }

    pub fn tasks(&self, account_id: &str) -> Result<Vec<InitTask>> {
        self.store.list(INIT_TASKS, &format!("{account_id}/"))
    }

    /// Build and persist a backfill plan.
    ///
    /// Refused when a backfill is already in progress or the account is
    /// already incremental, unless `force` is set.
    pub fn plan(&self, account_id: &str, force: bool, now: DateTime<Utc>) -> Result<InitializationProgress> {
        let existing = self.state(account_id)?;
        if let Some(state) = &existing {
            let busy = matches!(state.status, InitStatus::Planned | InitStatus::Running);
            if !force && (state.mode == SyncMode::Incremental || busy) {
                return Err(AdpilotError::InitializationExists(account_id.to_string()));
            }
        }

        let tz = self.timezones.timezone_for(account_id)?;
        let tasks = build_plan(account_id, local_date(now, tz), &self.cfg);
        self.store
            .delete_prefix(INIT_TASKS, &format!("{account_id}/"))?;
        let items: Vec<(String, InitTask)> = tasks.iter().map(|t| (t.key(), t.clone())).collect();
        self.store.put_many(INIT_TASKS, &items)?;

        let state = AccountSyncState {
            account_id: account_id.to_string(),
            mode: existing
                .as_ref()
                .map_or(SyncMode::Backfill, |s| s.mode),
            status: InitStatus::Planned,
            started_at: now,
            completed_at: None,
            incremental_since: existing.and_then(|s| s.incremental_since),
        };
        self.store.put(ACCOUNT_SYNC, account_id, &state)?;
        info!(account_id, tasks = tasks.len(), force, "backfill planned");
        Ok(progress_of(account_id, &state, &tasks, self.cfg.max_concurrent_tasks))
    }

    pub fn progress(&self, account_id: &str) -> Result<InitializationProgress> {
        let state = self
            .state(account_id)?
            .ok_or_else(|| AdpilotError::InitializationNotFound(account_id.to_string()))?;
        let tasks = self.tasks(account_id)?;
        Ok(progress_of(account_id, &state, &tasks, self.cfg.max_concurrent_tasks))
    }

    /// Run every pending task, phase by phase, then settle the account state.
    #[instrument(skip(self))]
    pub async fn run(&self, account_id: &str) -> Result<InitializationProgress> {
        self.set_status(account_id, InitStatus::Running)?;

        for phase in InitPhase::all() {
            let pending: Vec<InitTask> = self
                .tasks(account_id)?
                .into_iter()
                .filter(|t| t.phase == *phase && t.status == TaskStatus::Pending)
                .collect();
            if pending.is_empty() {
                continue;
            }
            info!(phase = %phase, tasks = pending.len(), "backfill phase started");

            let results: Vec<Result<()>> = stream::iter(pending)
                .map(|task| self.run_task(task))
                .buffer_unordered(self.cfg.max_concurrent_tasks.max(1))
                .collect()
                .await;
            for r in results {
                if let Err(e) = r {
                    warn!(error = %e, "backfill task could not be run");
                }
            }
        }

        let tasks = self.tasks(account_id)?;
        let all_done = tasks.iter().all(|t| t.status == TaskStatus::Completed);
        let now = Utc::now();
        let state = self
            .store
            .update::<AccountSyncState, _>(ACCOUNT_SYNC, account_id, |s| {
                if all_done {
                    s.status = InitStatus::Completed;
                    s.completed_at = Some(now);
                    if s.mode == SyncMode::Backfill {
                        s.mode = SyncMode::Incremental;
                        s.incremental_since = Some(now);
                    }
                } else {
                    s.status = InitStatus::Failed;
                }
                Ok(())
            })?
            .ok_or_else(|| AdpilotError::InitializationNotFound(account_id.to_string()))?;

        let progress = progress_of(account_id, &state, &tasks, self.cfg.max_concurrent_tasks);
        if all_done {
            info!(mode = ?state.mode, "backfill complete");
        } else {
            warn!(overall = progress.overall_progress, "backfill finished with failed tasks");
        }
        self.publish(&progress);
        Ok(progress)
    }

    /// Move failed tasks back to pending with a fresh attempt budget.
    /// Completed tasks are left untouched. Returns how many were re-queued.
    pub fn requeue_failed(&self, account_id: &str) -> Result<usize> {
        if self.state(account_id)?.is_none() {
            return Err(AdpilotError::InitializationNotFound(account_id.to_string()));
        }
        let failed: Vec<InitTask> = self
            .tasks(account_id)?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .collect();
        for task in &failed {
            self.store.update::<InitTask, _>(INIT_TASKS, &task.key(), |t| {
                if t.status == TaskStatus::Failed {
                    t.status = TaskStatus::Pending;
                    t.attempts = 0;
                }
                Ok(())
            })?;
        }
        if !failed.is_empty() {
            self.set_status(account_id, InitStatus::Planned)?;
        }
        info!(account_id, requeued = failed.len(), "failed backfill tasks re-queued");
        Ok(failed.len())
    }

    /// Re-queue failed tasks and run them.
    pub async fn retry_failed(&self, account_id: &str) -> Result<InitializationProgress> {
        self.requeue_failed(account_id)?;
        self.run(account_id).await
    }

    /// Fail tasks that have been running longer than `max_age`.
    pub fn fail_stalled(&self, now: DateTime<Utc>, max_age: Duration) -> Result<usize> {
        let stalled: Vec<InitTask> = self
            .store
            .list::<InitTask>(INIT_TASKS, "")?
            .into_iter()
            .filter(|t| {
                t.status == TaskStatus::Running
                    && t.started_at.is_some_and(|s| now - s > max_age)
            })
            .collect();
        for task in &stalled {
            self.store.update::<InitTask, _>(INIT_TASKS, &task.key(), |t| {
                if t.status == TaskStatus::Running {
                    t.status = TaskStatus::Failed;
                    t.last_error = Some("stalled".to_string());
                    t.completed_at = Some(now);
                }
                Ok(())
            })?;
            warn!(account_id = %task.account_id, task_id = %task.id, "stalled backfill task failed");
        }
        Ok(stalled.len())
    }

    async fn run_task(&self, task: InitTask) -> Result<()> {
        let key = task.key();
        loop {
            let now = Utc::now();
            let claimed = self.store.update::<InitTask, _>(INIT_TASKS, &key, |t| {
                if t.status != TaskStatus::Pending {
                    return Err(AdpilotError::InvalidTransition {
                        from: format!("{:?}", t.status).to_lowercase(),
                        to: "running".to_string(),
                        reason: "task is not pending".to_string(),
                    });
                }
                t.status = TaskStatus::Running;
                t.attempts += 1;
                t.started_at = Some(now);
                Ok(())
            });
            let task = match claimed {
                Ok(Some(t)) => t,
                // another runner took it, or it was deleted by a forced replan
                Ok(None) | Err(AdpilotError::InvalidTransition { .. }) => return Ok(()),
                Err(e) => return Err(e),
            };

            let job = self.executor.create(
                SyncJob::new(&task.account_id, task.sync_type, JobTrigger::Initialization)
                    .with_slice(task.window, task.channel.clone()),
            )?;
            let outcome = self.executor.run(&job.id).await;
            let (status, error, retry) = match outcome {
                Ok(j) if j.status == JobStatus::Completed => (TaskStatus::Completed, None, false),
                Ok(j) => {
                    let transient = j.error_kind == Some(ErrorKind::Transient);
                    let retry = transient && task.attempts < self.cfg.max_task_attempts;
                    let status = if retry { TaskStatus::Pending } else { TaskStatus::Failed };
                    (status, j.error_message, retry)
                }
                Err(e) => (TaskStatus::Failed, Some(e.to_string()), false),
            };

            let done_at = Utc::now();
            self.store.update::<InitTask, _>(INIT_TASKS, &key, |t| {
                t.job_id = Some(job.id.clone());
                t.status = status;
                t.last_error = error.clone();
                if status != TaskStatus::Pending {
                    t.completed_at = Some(done_at);
                }
                Ok(())
            })?;

            if !retry {
                if status == TaskStatus::Failed {
                    warn!(task_id = %task.id, attempts = task.attempts, "backfill task failed");
                }
                if let Ok(p) = self.progress(&task.account_id) {
                    self.publish(&p);
                }
                return Ok(());
            }
            warn!(task_id = %task.id, attempt = task.attempts, "backfill task failed transiently, retrying");
        }
    }

    fn set_status(&self, account_id: &str, status: InitStatus) -> Result<()> {
        self.store
            .update::<AccountSyncState, _>(ACCOUNT_SYNC, account_id, |s| {
                s.status = status;
                Ok(())
            })?
            .ok_or_else(|| AdpilotError::InitializationNotFound(account_id.to_string()))?;
        Ok(())
    }

    fn publish(&self, p: &InitializationProgress) {
        self.events.publish(EngineEvent::InitializationProgress {
            account_id: p.account_id.clone(),
            overall_progress: p.overall_progress,
            status: format!("{:?}", p.status).to_lowercase(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AdsApi, Page, PageRequest};
    use crate::automation::action::ProposedAction;
    use crate::config::{Config, RateLimitConfig};
    use crate::rate_limiter::RateLimiter;
    use crate::tz::ConfigTimezones;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
    }

    #[test]
    fn default_plan_shape() {
        let tasks = build_plan("a", today(), &InitializationConfig::default());
        let count = |p| tasks.iter().filter(|t| t.phase == p).count();
        assert_eq!(count(InitPhase::HotData), 30);
        assert_eq!(count(InitPhase::ColdData), 20);
        assert_eq!(count(InitPhase::StructureData), 2);

        let first = &tasks[0];
        assert_eq!(first.channel.as_deref(), Some("sp"));
        assert_eq!(
            first.window,
            Some(DateWindow {
                start: today() - Duration::days(8),
                end: today(),
            })
        );
        // keys sort in execution order
        let mut ids: Vec<_> = tasks.iter().map(|t| t.id.clone()).collect();
        let original = ids.clone();
        ids.sort();
        assert_eq!(ids, original);
    }

    #[test]
    fn windows_cover_range_without_gaps() {
        let ws = windows(today(), 91, 365, 30);
        assert_eq!(ws.len(), 10);
        assert_eq!(ws[0].end, today() - Duration::days(91));
        assert_eq!(ws.last().unwrap().start, today() - Duration::days(365));
        for pair in ws.windows(2) {
            assert_eq!(pair[1].end, pair[0].start - Duration::days(1));
        }
    }

    #[test]
    fn overall_progress_is_task_weighted() {
        let mut tasks = build_plan("a", today(), &InitializationConfig::default());
        for t in tasks.iter_mut().filter(|t| t.phase == InitPhase::HotData) {
            t.status = TaskStatus::Completed;
        }
        let state = AccountSyncState {
            account_id: "a".to_string(),
            mode: SyncMode::Backfill,
            status: InitStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            incremental_since: None,
        };
        let p = progress_of("a", &state, &tasks, 2);
        assert_eq!(p.phases[0].progress_percent, 100.0);
        assert_eq!(p.phases[1].progress_percent, 0.0);
        // 30 of 52 tasks
        assert!((p.overall_progress - 30.0 * 100.0 / 52.0).abs() < 1e-9);
    }

    /// Fails the two oldest cold-data slices of `fail_channel` until `heal`
    /// is set.
    struct FlakyApi {
        fail_channel: String,
        failures: AtomicU32,
        fatal: bool,
        heal: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl AdsApi for FlakyApi {
        async fn fetch_page(&self, _a: &str, req: &PageRequest) -> Result<Page> {
            let is_target = req.channel.as_deref() == Some(self.fail_channel.as_str())
                && req.window.is_some_and(|w| w.end < today_real() - Duration::days(320));
            if is_target && !self.heal.load(Ordering::SeqCst) {
                self.failures.fetch_add(1, Ordering::SeqCst);
                if self.fatal {
                    return Err(AdpilotError::FatalApi("403".into()));
                }
                return Err(AdpilotError::TransientApi("503".into()));
            }
            Ok(Page {
                records: 1,
                next_token: None,
            })
        }

        async fn apply_change(&self, _a: &str, _x: &ProposedAction) -> Result<()> {
            Ok(())
        }
    }

    fn today_real() -> NaiveDate {
        local_date(Utc::now(), chrono_tz::America::Los_Angeles)
    }

    fn initializer(api: Arc<FlakyApi>) -> (TempDir, Initializer) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("db.redb")).unwrap());
        let limiter = RateLimiter::new(&RateLimitConfig {
            per_second: 10_000,
            per_minute: 100_000,
            per_hour: 1_000_000,
            max_queue_depth: 100,
        });
        let events = EventSink::default();
        let exec = Arc::new(SyncExecutor::new(
            Arc::clone(&store),
            api,
            limiter,
            100,
            events.clone(),
        ));
        let init = Initializer::new(
            store,
            exec,
            Arc::new(ConfigTimezones::new(Config::default())),
            InitializationConfig::default(),
            events,
        );
        (dir, init)
    }

    #[tokio::test]
    async fn full_run_switches_to_incremental() {
        let api = Arc::new(FlakyApi {
            fail_channel: "none".to_string(),
            failures: AtomicU32::new(0),
            fatal: false,
            heal: Default::default(),
        });
        let (_dir, init) = initializer(api);
        init.plan("a", false, Utc::now()).unwrap();
        let p = init.run("a").await.unwrap();
        assert_eq!(p.status, InitStatus::Completed);
        assert_eq!(p.mode, SyncMode::Incremental);
        assert_eq!(p.overall_progress, 100.0);
        assert_eq!(p.estimated_time_remaining_secs, Some(0));

        // already incremental: refused without force, allowed with it
        assert!(matches!(
            init.plan("a", false, Utc::now()),
            Err(AdpilotError::InitializationExists(_))
        ));
        let replanned = init.plan("a", true, Utc::now()).unwrap();
        assert_eq!(replanned.mode, SyncMode::Incremental);
        assert_eq!(replanned.overall_progress, 0.0);
    }

    #[tokio::test]
    async fn transient_task_failures_are_retried_then_fail() {
        let api = Arc::new(FlakyApi {
            fail_channel: "sb".to_string(),
            failures: AtomicU32::new(0),
            fatal: false,
            heal: Default::default(),
        });
        let (_dir, init) = initializer(Arc::clone(&api));
        init.plan("a", false, Utc::now()).unwrap();
        let p = init.run("a").await.unwrap();
        assert_eq!(p.status, InitStatus::Failed);
        assert_eq!(p.mode, SyncMode::Backfill);

        let failed: Vec<_> = init
            .tasks("a")
            .unwrap()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .collect();
        assert!(!failed.is_empty());
        assert!(failed.iter().all(|t| t.attempts == 3 && t.phase == InitPhase::ColdData));
        assert_eq!(api.failures.load(Ordering::SeqCst), 3 * failed.len() as u32);
    }

    #[tokio::test]
    async fn fatal_task_failures_are_not_retried() {
        let api = Arc::new(FlakyApi {
            fail_channel: "sp".to_string(),
            failures: AtomicU32::new(0),
            fatal: true,
            heal: Default::default(),
        });
        let (_dir, init) = initializer(api);
        init.plan("a", false, Utc::now()).unwrap();
        init.run("a").await.unwrap();
        let failed: Vec<_> = init
            .tasks("a")
            .unwrap()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .collect();
        assert!(!failed.is_empty());
        assert!(failed.iter().all(|t| t.attempts == 1));
    }

    #[tokio::test]
    async fn retry_failed_requeues_only_failed_tasks() {
        let api = Arc::new(FlakyApi {
            fail_channel: "sb".to_string(),
            failures: AtomicU32::new(0),
            fatal: true,
            heal: Default::default(),
        });
        let (_dir, init) = initializer(Arc::clone(&api));
        init.plan("a", false, Utc::now()).unwrap();
        init.run("a").await.unwrap();

        let p = init.progress("a").unwrap();
        assert_eq!(p.phases[0].completed_tasks, 30);
        assert_eq!(p.phases[1].completed_tasks, 18);
        assert_eq!(p.phases[1].failed_tasks, 2);
        assert_eq!(init.requeue_failed("a").unwrap(), 2);
        assert_eq!(init.requeue_failed("a").unwrap(), 0);

        let before = init.tasks("a").unwrap();
        let failed_ids: Vec<_> = before
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect();
        let hot_jobs: Vec<_> = before
            .iter()
            .filter(|t| t.phase == InitPhase::HotData)
            .map(|t| t.job_id.clone())
            .collect();

        api.heal.store(true, Ordering::SeqCst);
        let p = init.retry_failed("a").await.unwrap();
        assert_eq!(p.status, InitStatus::Completed);
        assert_eq!(p.mode, SyncMode::Incremental);

        let after = init.tasks("a").unwrap();
        let hot_jobs_after: Vec<_> = after
            .iter()
            .filter(|t| t.phase == InitPhase::HotData)
            .map(|t| t.job_id.clone())
            .collect();
        assert_eq!(hot_jobs, hot_jobs_after);
        for t in after.iter().filter(|t| failed_ids.contains(&t.id)) {
            assert_eq!(t.status, TaskStatus::Completed);
        }
    }

    #[test]
    fn progress_without_plan_is_not_found() {
        let api = Arc::new(FlakyApi {
            fail_channel: "x".to_string(),
            failures: AtomicU32::new(0),
            fatal: false,
            heal: Default::default(),
        });
        let (_dir, init) = initializer(api);
        assert!(matches!(
            init.progress("nobody"),
            Err(AdpilotError::InitializationNotFound(_))
        ));
    }
}

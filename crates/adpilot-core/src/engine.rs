//! The engine wires the components over one store, one rate limiter and one
//! event sink, and exposes the operations the CLI and server call.
//!
//! Scheduling is tick-driven: [`Engine::tick`] triggers due schedules, runs
//! pending manual jobs and fails stalled work. [`Engine::run_loop`] calls it
//! on the configured interval until shutdown.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::api::{AdsApi, HttpAdsApi};
use crate::automation::{
    AutomationConfig, AutomationPatch, DailyExecutionStats, Governor, PendingApproval,
    ProposedAction,
};
use crate::config::Config;
use crate::error::{AdpilotError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::initialization::{InitTask, InitializationProgress, Initializer};
use crate::ledger::{BatchRecord, ExecutionDetail};
use crate::paths;
use crate::rate_limiter::{RateLimitStatus, RateLimiter};
use crate::retry::RetryPolicy;
use crate::schedule::{
    NewSchedule, ScheduleExecution, SchedulePatch, ScheduleStats, Scheduler, SyncSchedule,
};
use crate::store::Store;
use crate::sync_job::{JobFilter, JobTrigger, SyncExecutor, SyncJob};
use crate::types::{JobStatus, SyncType};
use crate::tz::ConfigTimezones;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub schedules_triggered: usize,
    pub schedules_failed: usize,
    pub jobs_run: usize,
    pub stalled_jobs: usize,
    pub stalled_tasks: usize,
}

pub struct Engine {
    root: PathBuf,
    config: Config,
    limiter: RateLimiter,
    executor: Arc<SyncExecutor>,
    scheduler: Scheduler,
    initializer: Initializer,
    governor: Governor,
    events: EventSink,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("root", &self.root).finish()
    }
}

impl Engine {
    /// Open the project at `root` against the configured HTTP API.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        let api = HttpAdsApi::from_config(&config.api)?;
        Self::with_api(root, config, Arc::new(api))
    }

    /// Open with an explicit config and API adapter.
    pub fn with_api(root: &Path, config: Config, api: Arc<dyn AdsApi>) -> Result<Self> {
        for w in config.validate() {
            if w.level == crate::config::WarnLevel::Error {
                return Err(AdpilotError::InvalidInput(w.message));
            }
            warn!(message = %w.message, "config warning");
        }

        let store = Arc::new(Store::open(&paths::db_path(root))?);
        let events = EventSink::default();
        let limiter = RateLimiter::new(&config.rate_limits);
        let timezones = Arc::new(ConfigTimezones::new(config.clone()));

        let executor = Arc::new(SyncExecutor::new(
            Arc::clone(&store),
            Arc::clone(&api),
            limiter.clone(),
            config.sync.page_size,
            events.clone(),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            timezones.clone(),
            events.clone(),
        );
        let initializer = Initializer::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            timezones.clone(),
            config.initialization.clone(),
            events.clone(),
        );
        let governor = Governor::new(
            store,
            api,
            limiter.clone(),
            timezones,
            config.automation_defaults.clone(),
            events.clone(),
        );

        Ok(Self {
            root: root.to_path_buf(),
            config,
            limiter,
            executor,
            scheduler,
            initializer,
            governor,
            events,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Retry policy the tick uses for due schedules.
    pub fn schedule_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.sync.schedule_max_attempts,
            Duration::from_millis(self.config.sync.schedule_backoff_ms),
        )
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    pub fn create_job(&self, account_id: &str, sync_type: SyncType) -> Result<SyncJob> {
        require_account(account_id)?;
        self.executor
            .create(SyncJob::new(account_id, sync_type, JobTrigger::Manual))
    }

    pub async fn run_job(&self, job_id: &str) -> Result<SyncJob> {
        self.executor.run(job_id).await
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<SyncJob> {
        self.executor.cancel(job_id)
    }

    pub fn job(&self, job_id: &str) -> Result<SyncJob> {
        self.executor.get(job_id)
    }

    pub fn jobs(&self, filter: &JobFilter) -> Result<Vec<SyncJob>> {
        self.executor.list(filter)
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status()
    }

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    pub fn create_schedule(&self, new: NewSchedule) -> Result<SyncSchedule> {
        require_account(&new.account_id)?;
        self.scheduler.create(new, Utc::now())
    }

    pub fn update_schedule(&self, id: &str, patch: SchedulePatch) -> Result<SyncSchedule> {
        self.scheduler.update(id, patch, Utc::now())
    }

    pub fn delete_schedule(&self, id: &str) -> Result<()> {
        self.scheduler.delete(id)
    }

    pub fn schedule(&self, id: &str) -> Result<SyncSchedule> {
        self.scheduler.get(id)
    }

    pub fn schedules(&self, account_id: Option<&str>) -> Result<Vec<SyncSchedule>> {
        self.scheduler.list(account_id)
    }

    pub async fn trigger_schedule(&self, id: &str) -> Result<ScheduleExecution> {
        self.scheduler.trigger(id).await
    }

    /// Trigger with bounded retry; `None` uses the configured policy.
    pub async fn trigger_schedule_with_retry(
        &self,
        id: &str,
        policy: Option<RetryPolicy>,
    ) -> Result<ScheduleExecution> {
        let policy = policy.unwrap_or_else(|| self.schedule_retry_policy());
        self.scheduler.trigger_with_retry(id, &policy).await
    }

    pub fn schedule_history(&self, id: &str, limit: Option<usize>) -> Result<Vec<ScheduleExecution>> {
        self.scheduler.history(id, limit)
    }

    pub fn schedule_stats(&self, id: &str) -> Result<ScheduleStats> {
        self.scheduler.stats(id)
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    /// Build the backfill plan without running it.
    pub fn plan_initialization(&self, account_id: &str, force: bool) -> Result<InitializationProgress> {
        require_account(account_id)?;
        self.initializer.plan(account_id, force, Utc::now())
    }

    pub async fn run_initialization(&self, account_id: &str) -> Result<InitializationProgress> {
        self.initializer.run(account_id).await
    }

    /// Plan and run the backfill to completion.
    pub async fn start_initialization(
        &self,
        account_id: &str,
        force: bool,
    ) -> Result<InitializationProgress> {
        self.plan_initialization(account_id, force)?;
        self.run_initialization(account_id).await
    }

    pub async fn retry_failed_initialization(&self, account_id: &str) -> Result<InitializationProgress> {
        self.initializer.retry_failed(account_id).await
    }

    pub fn requeue_failed_initialization(&self, account_id: &str) -> Result<usize> {
        self.initializer.requeue_failed(account_id)
    }

    pub fn initialization_progress(&self, account_id: &str) -> Result<InitializationProgress> {
        self.initializer.progress(account_id)
    }

    pub fn initialization_tasks(&self, account_id: &str) -> Result<Vec<InitTask>> {
        self.initializer.tasks(account_id)
    }

    // -----------------------------------------------------------------------
    // Automation
    // -----------------------------------------------------------------------

    pub fn automation_config(&self, account_id: &str) -> Result<AutomationConfig> {
        self.governor.config(account_id)
    }

    pub fn update_automation_config(
        &self,
        account_id: &str,
        patch: AutomationPatch,
    ) -> Result<AutomationConfig> {
        require_account(account_id)?;
        self.governor.update_config(account_id, patch)
    }

    pub async fn run_full_cycle(
        &self,
        account_id: &str,
        proposals: Vec<ProposedAction>,
    ) -> Result<BatchRecord> {
        require_account(account_id)?;
        self.governor.run_full_cycle(account_id, proposals).await
    }

    pub fn emergency_stop(&self, account_id: &str, reason: &str) -> Result<AutomationConfig> {
        require_account(account_id)?;
        self.governor.emergency_stop(account_id, reason)
    }

    pub fn resume(&self, account_id: &str) -> Result<AutomationConfig> {
        require_account(account_id)?;
        self.governor.resume(account_id)
    }

    pub fn daily_stats(&self, account_id: &str, date: Option<NaiveDate>) -> Result<DailyExecutionStats> {
        self.governor.daily_stats(account_id, date)
    }

    pub fn recent_daily_stats(&self, account_id: &str, limit: usize) -> Result<Vec<DailyExecutionStats>> {
        self.governor.recent_daily_stats(account_id, limit)
    }

    pub fn execution_history(&self, account_id: &str, limit: Option<usize>) -> Result<Vec<BatchRecord>> {
        self.governor.history(account_id, limit)
    }

    pub fn execution_detail(&self, detail_id: &str) -> Result<ExecutionDetail> {
        self.governor.detail(detail_id)
    }

    pub fn pending_approvals(&self, account_id: Option<&str>) -> Result<Vec<PendingApproval>> {
        self.governor.pending_approvals(account_id)
    }

    pub async fn approve(&self, approval_id: &str) -> Result<BatchRecord> {
        self.governor.approve(approval_id).await
    }

    pub fn reject(&self, approval_id: &str) -> Result<PendingApproval> {
        self.governor.reject(approval_id)
    }

    pub async fn rollback(&self, detail_id: &str) -> Result<BatchRecord> {
        self.governor.rollback(detail_id).await
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// One scheduling pass. Individual failures are logged and counted; only
    /// storage failures while listing work abort the tick.
    #[instrument(level = "debug", skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        let max_age = chrono::Duration::seconds(self.config.sync.max_job_duration_secs as i64);
        match self.executor.fail_stalled(now, max_age) {
            Ok(jobs) => report.stalled_jobs = jobs.len(),
            Err(e) => warn!(error = %e, "job watchdog failed"),
        }
        match self.initializer.fail_stalled(now, max_age) {
            Ok(n) => report.stalled_tasks = n,
            Err(e) => warn!(error = %e, "backfill watchdog failed"),
        }

        let due = self.scheduler.due(now)?;
        let policy = &self.schedule_retry_policy();
        let runs = due.iter().map(|s| async move {
            let outcome = self.scheduler.trigger_due(&s.id, now, policy).await;
            (s, outcome)
        });
        for (schedule, outcome) in join_all(runs).await {
            match outcome {
                // claimed by an overlapping tick
                Ok(None) => {}
                Ok(Some(exec)) if exec.status == JobStatus::Completed => {
                    report.schedules_triggered += 1;
                }
                Ok(Some(exec)) => {
                    report.schedules_triggered += 1;
                    report.schedules_failed += 1;
                    warn!(
                        schedule_id = %schedule.id,
                        error = exec.error_message.as_deref().unwrap_or_default(),
                        "scheduled sync failed"
                    );
                }
                Err(e) => {
                    report.schedules_triggered += 1;
                    report.schedules_failed += 1;
                    warn!(schedule_id = %schedule.id, error = %e, "schedule trigger failed");
                }
            }
        }

        let pending = self.executor.list(&JobFilter {
            status: Some(JobStatus::Pending),
            ..Default::default()
        })?;
        let manual: Vec<_> = pending
            .into_iter()
            .filter(|j| j.trigger == JobTrigger::Manual)
            .collect();
        let runs = manual.iter().map(|j| self.executor.run(&j.id));
        for (job, outcome) in manual.iter().zip(join_all(runs).await) {
            match outcome {
                Ok(_) => report.jobs_run += 1,
                // cancelled between listing and claiming
                Err(AdpilotError::InvalidTransition { .. }) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "pending job could not be run"),
            }
        }

        debug!(?report, "tick finished");
        Ok(report)
    }

    /// Tick on the configured interval until `shutdown` resolves.
    pub async fn run_loop(&self, shutdown: impl Future<Output = ()>) {
        let period = Duration::from_secs(self.config.sync.tick_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = period.as_secs(), "scheduler loop started");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        warn!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }
    }
}

/// Account ids prefix every per-account storage key, so they cannot hold the
/// `/` separator.
fn require_account(account_id: &str) -> Result<()> {
    if account_id.trim().is_empty() {
        return Err(AdpilotError::InvalidInput(
            "account id must not be empty".to_string(),
        ));
    }
    if account_id.contains('/') {
        return Err(AdpilotError::InvalidInput(format!(
            "account id '{account_id}' must not contain '/'"
        )));
    }
    Ok(())
}

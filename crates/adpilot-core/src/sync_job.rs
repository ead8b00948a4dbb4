//! Sync jobs: one bounded pull of account data from the ads API.
//!
//! Lifecycle: `Pending → Running → Completed | Failed`, or `Pending → Cancelled`.
//! The executor claims a job by flipping `Pending → Running` inside one store
//! transaction, so a concurrent cancel either wins (job never runs) or loses
//! (cancel is rejected). Jobs never retry internally; retry belongs to the
//! scheduler and the backfill orchestrator.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::api::{AdsApi, PageRequest};
use crate::error::{AdpilotError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::rate_limiter::RateLimiter;
use crate::store::{Store, JOBS};
use crate::types::{ErrorKind, JobStatus, SyncType};

// ---------------------------------------------------------------------------
// DateWindow / JobTrigger
// ---------------------------------------------------------------------------

/// Inclusive range of report dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTrigger {
    Manual,
    Schedule,
    Initialization,
}

// ---------------------------------------------------------------------------
// SyncJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub account_id: String,
    pub sync_type: SyncType,
    pub status: JobStatus,
    pub trigger: JobTrigger,
    pub records_synced: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
}

impl SyncJob {
    pub fn new(account_id: impl Into<String>, sync_type: SyncType, trigger: JobTrigger) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            sync_type,
            status: JobStatus::Pending,
            trigger,
            records_synced: 0,
            window: None,
            channel: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            error_kind: None,
        }
    }

    /// Restrict the job to one backfill slice.
    pub fn with_slice(mut self, window: Option<DateWindow>, channel: Option<String>) -> Self {
        self.window = window;
        self.channel = channel;
        self
    }

    fn transition_error(&self, to: JobStatus, reason: &str) -> AdpilotError {
        AdpilotError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(self.transition_error(
                JobStatus::Cancelled,
                "only pending jobs can be cancelled",
            ));
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(self.transition_error(JobStatus::Running, "job is not pending"));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, records: u64, now: DateTime<Utc>) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(self.transition_error(JobStatus::Completed, "job is not running"));
        }
        self.status = JobStatus::Completed;
        self.records_synced = records;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(
        &mut self,
        kind: ErrorKind,
        message: impl Into<String>,
        records: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(self.transition_error(JobStatus::Failed, "job is not running"));
        }
        self.status = JobStatus::Failed;
        self.records_synced = records;
        self.error_kind = Some(kind);
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// `completed_at - started_at`, or time since start while running.
    pub fn duration(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.completed_at.unwrap_or(now) - started)
    }
}

// ---------------------------------------------------------------------------
// JobFilter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub sync_type: Option<SyncType>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &SyncJob) -> bool {
        self.account_id.as_deref().map_or(true, |a| a == job.account_id)
            && self.status.map_or(true, |s| s == job.status)
            && self.sync_type.map_or(true, |t| t == job.sync_type)
    }
}

// ---------------------------------------------------------------------------
// SyncExecutor
// ---------------------------------------------------------------------------

pub struct SyncExecutor {
    store: Arc<Store>,
    api: Arc<dyn AdsApi>,
    limiter: RateLimiter,
    page_size: u32,
    events: EventSink,
}

impl SyncExecutor {
    pub fn new(
        store: Arc<Store>,
        api: Arc<dyn AdsApi>,
        limiter: RateLimiter,
        page_size: u32,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            api,
            limiter,
            page_size,
            events,
        }
    }

    pub fn create(&self, job: SyncJob) -> Result<SyncJob> {
        self.store.put(JOBS, &job.id, &job)?;
        info!(job_id = %job.id, account_id = %job.account_id, sync_type = %job.sync_type, "sync job created");
        self.publish(&job);
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Result<SyncJob> {
        self.store
            .get(JOBS, job_id)?
            .ok_or_else(|| AdpilotError::JobNotFound(job_id.to_string()))
    }

    /// Jobs matching `filter`, newest first.
    pub fn list(&self, filter: &JobFilter) -> Result<Vec<SyncJob>> {
        let mut jobs: Vec<SyncJob> = self
            .store
            .list::<SyncJob>(JOBS, "")?
            .into_iter()
            .filter(|j| filter.matches(j))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    pub fn cancel(&self, job_id: &str) -> Result<SyncJob> {
        let job = self
            .store
            .update::<SyncJob, _>(JOBS, job_id, |job| job.cancel(Utc::now()))?
            .ok_or_else(|| AdpilotError::JobNotFound(job_id.to_string()))?;
        info!(job_id = %job.id, account_id = %job.account_id, "sync job cancelled");
        self.publish(&job);
        Ok(job)
    }

    /// Claim and run a pending job to a terminal state.
    ///
    /// API failures end the job as `failed` and are reported through the
    /// returned job, not as `Err`. `Err` means the job could not be claimed or
    /// state could not be persisted.
    #[instrument(skip(self), fields(account_id = tracing::field::Empty))]
    pub async fn run(&self, job_id: &str) -> Result<SyncJob> {
        let job = self
            .store
            .update::<SyncJob, _>(JOBS, job_id, |job| job.claim(Utc::now()))?
            .ok_or_else(|| AdpilotError::JobNotFound(job_id.to_string()))?;
        tracing::Span::current().record("account_id", job.account_id.as_str());
        info!(sync_type = %job.sync_type, "sync job started");
        self.publish(&job);

        let mut records = 0u64;
        let outcome = self.fetch_all(&job, &mut records).await;

        let finished = self.store.update::<SyncJob, _>(JOBS, job_id, |stored| {
            let now = Utc::now();
            match &outcome {
                Ok(()) => stored.complete(records, now),
                Err(e) => {
                    let kind = if e.is_transient() {
                        ErrorKind::Transient
                    } else {
                        ErrorKind::Fatal
                    };
                    stored.fail(kind, e.to_string(), records, now)
                }
            }
        });

        let job = match finished {
            Ok(Some(job)) => job,
            Ok(None) => return Err(AdpilotError::JobNotFound(job_id.to_string())),
            // the watchdog already failed it as stalled
            Err(AdpilotError::InvalidTransition { .. }) => {
                warn!("job finished after being marked stalled");
                self.get(job_id)?
            }
            Err(e) => return Err(e),
        };

        match job.status {
            JobStatus::Completed => info!(records = job.records_synced, "sync job completed"),
            _ => warn!(
                error = job.error_message.as_deref().unwrap_or_default(),
                "sync job failed"
            ),
        }
        self.publish(&job);
        Ok(job)
    }

    async fn fetch_all(&self, job: &SyncJob, records: &mut u64) -> Result<()> {
        for entity in job.sync_type.entities() {
            let mut page_token = None;
            loop {
                self.limiter.acquire_patiently(1).await?;
                let request = PageRequest {
                    entity: *entity,
                    page_size: self.page_size,
                    page_token: page_token.take(),
                    window: job.window,
                    channel: job.channel.clone(),
                };
                let page = self.api.fetch_page(&job.account_id, &request).await?;
                *records += page.records;
                debug!(entity = %entity, records = page.records, "page fetched");
                match page.next_token {
                    Some(t) => page_token = Some(t),
                    None => break,
                }
            }
        }
        Ok(())
    }

    /// Fail every job that has been running longer than `max_age`.
    pub fn fail_stalled(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> Result<Vec<SyncJob>> {
        let running = self.list(&JobFilter {
            status: Some(JobStatus::Running),
            ..Default::default()
        })?;
        let mut failed = Vec::new();
        for job in running {
            let Some(started) = job.started_at else {
                continue;
            };
            if now - started <= max_age {
                continue;
            }
            let updated = self.store.update::<SyncJob, _>(JOBS, &job.id, |j| {
                let records = j.records_synced;
                j.fail(
                    ErrorKind::Stalled,
                    format!("stalled: running longer than {}s", max_age.num_seconds()),
                    records,
                    now,
                )
            });
            match updated {
                Ok(Some(j)) => {
                    warn!(job_id = %j.id, account_id = %j.account_id, "stalled job failed");
                    self.publish(&j);
                    failed.push(j);
                }
                Ok(None) | Err(AdpilotError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    fn publish(&self, job: &SyncJob) {
        self.events.publish(EngineEvent::JobUpdated {
            job_id: job.id.clone(),
            account_id: job.account_id.clone(),
            status: job.status,
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::automation::action::ProposedAction;
    use crate::config::RateLimitConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted API: each fetch pops the next response; an empty script
    /// returns a single empty last page.
    #[derive(Default)]
    pub(crate) struct ScriptedApi {
        pub pages: Mutex<VecDeque<Result<crate::api::Page>>>,
        pub requests: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedApi {
        pub fn with(pages: Vec<Result<crate::api::Page>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AdsApi for ScriptedApi {
        async fn fetch_page(&self, _account: &str, request: &PageRequest) -> Result<crate::api::Page> {
            self.requests.lock().unwrap().push(request.clone());
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(crate::api::Page::default()))
        }

        async fn apply_change(&self, _account: &str, _action: &ProposedAction) -> Result<()> {
            Ok(())
        }
    }

    fn page(records: u64, next: Option<&str>) -> Result<crate::api::Page> {
        Ok(crate::api::Page {
            records,
            next_token: next.map(str::to_string),
        })
    }

    fn executor(api: Arc<ScriptedApi>) -> (TempDir, SyncExecutor) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("db.redb")).unwrap());
        let limiter = RateLimiter::new(&RateLimitConfig {
            per_second: 100,
            per_minute: 1000,
            per_hour: 10000,
            max_queue_depth: 10,
        });
        let exec = SyncExecutor::new(store, api, limiter, 50, EventSink::default());
        (dir, exec)
    }

    #[test]
    fn cancel_only_from_pending() {
        let now = Utc::now();
        let mut job = SyncJob::new("a", SyncType::Campaigns, JobTrigger::Manual);
        job.cancel(now).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.cancel(now).is_err());
        assert!(job.claim(now).is_err());

        let mut running = SyncJob::new("a", SyncType::Campaigns, JobTrigger::Manual);
        running.claim(now).unwrap();
        let err = running.cancel(now).unwrap_err();
        assert!(matches!(err, AdpilotError::InvalidTransition { .. }));
    }

    #[test]
    fn duration_uses_now_while_running() {
        let start = Utc::now();
        let mut job = SyncJob::new("a", SyncType::Keywords, JobTrigger::Manual);
        assert!(job.duration(start).is_none());
        job.claim(start).unwrap();
        let later = start + chrono::Duration::seconds(30);
        assert_eq!(job.duration(later), Some(chrono::Duration::seconds(30)));
        job.complete(5, start + chrono::Duration::seconds(10)).unwrap();
        assert_eq!(job.duration(later), Some(chrono::Duration::seconds(10)));
    }

    #[tokio::test]
    async fn run_follows_pages_for_every_entity() {
        let api = Arc::new(ScriptedApi::with(vec![
            page(10, Some("c2")),
            page(5, None),
            page(7, None),
            page(3, None),
        ]));
        let (_dir, exec) = executor(Arc::clone(&api));
        let job = exec
            .create(SyncJob::new("a", SyncType::All, JobTrigger::Manual))
            .unwrap();
        let done = exec.run(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.records_synced, 25);

        let reqs = api.requests.lock().unwrap();
        let entities: Vec<_> = reqs.iter().map(|r| r.entity).collect();
        assert_eq!(
            entities,
            vec![
                SyncType::Campaigns,
                SyncType::Campaigns,
                SyncType::Keywords,
                SyncType::Performance
            ]
        );
        assert_eq!(reqs[1].page_token.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn api_error_fails_without_retry() {
        let api = Arc::new(ScriptedApi::with(vec![
            page(4, Some("n")),
            Err(AdpilotError::TransientApi("503".into())),
        ]));
        let (_dir, exec) = executor(Arc::clone(&api));
        let job = exec
            .create(SyncJob::new("a", SyncType::Campaigns, JobTrigger::Manual))
            .unwrap();
        let done = exec.run(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error_kind, Some(ErrorKind::Transient));
        assert_eq!(done.records_synced, 4);
        assert!(done.error_message.unwrap().contains("503"));
        assert_eq!(api.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_job_cannot_run() {
        let (_dir, exec) = executor(Arc::new(ScriptedApi::default()));
        let job = exec
            .create(SyncJob::new("a", SyncType::Campaigns, JobTrigger::Manual))
            .unwrap();
        exec.cancel(&job.id).unwrap();
        assert!(matches!(
            exec.run(&job.id).await,
            Err(AdpilotError::InvalidTransition { .. })
        ));
        assert_eq!(exec.get(&job.id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let (_dir, exec) = executor(Arc::new(ScriptedApi::default()));
        let first = exec
            .create(SyncJob::new("a", SyncType::Campaigns, JobTrigger::Manual))
            .unwrap();
        let mut second = SyncJob::new("a", SyncType::Keywords, JobTrigger::Manual);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        exec.create(second.clone()).unwrap();
        exec.create(SyncJob::new("b", SyncType::Campaigns, JobTrigger::Manual))
            .unwrap();

        let jobs = exec
            .list(&JobFilter {
                account_id: Some("a".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, second.id);

        let keywords = exec
            .list(&JobFilter {
                sync_type: Some(SyncType::Keywords),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(keywords.len(), 1);
    }

    #[test]
    fn stalled_running_jobs_fail() {
        let (_dir, exec) = executor(Arc::new(ScriptedApi::default()));
        let now = Utc::now();
        let mut old = SyncJob::new("a", SyncType::Campaigns, JobTrigger::Manual);
        old.claim(now - chrono::Duration::hours(2)).unwrap();
        let mut fresh = SyncJob::new("a", SyncType::Campaigns, JobTrigger::Manual);
        fresh.claim(now - chrono::Duration::minutes(5)).unwrap();
        exec.create(old.clone()).unwrap();
        exec.create(fresh.clone()).unwrap();

        let failed = exec.fail_stalled(now, chrono::Duration::hours(1)).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, old.id);
        assert_eq!(failed[0].error_kind, Some(ErrorKind::Stalled));
        assert_eq!(exec.get(&fresh.id).unwrap().status, JobStatus::Running);
    }
}

//! Recurring sync schedules.
//!
//! A schedule fires a sync job at a wall-clock time in the account's
//! marketplace time zone. [`compute_next_run`] is a pure function of the
//! schedule and `now`. The [`Scheduler`] claims a due slot by advancing
//! `next_run_at` in the same transaction that re-checks it is due, before the
//! job runs, so overlapping ticks cannot fire the same run twice.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AdpilotError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::retry::RetryPolicy;
use crate::store::{ts_key, Store, SCHEDULES, SCHEDULE_EXECUTIONS};
use crate::sync_job::{JobTrigger, SyncExecutor, SyncJob};
use crate::types::{ErrorKind, Frequency, JobStatus, SyncType};
use crate::tz::{resolve_local, TimezoneResolver};

// ---------------------------------------------------------------------------
// SyncSchedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSchedule {
    pub id: String,
    pub account_id: String,
    pub sync_type: SyncType,
    pub frequency: Frequency,
    /// Local wall-clock time. Ignored for hourly schedules.
    pub time_of_day: NaiveTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<Weekday>,
    /// 1..=31; months without that day run on their last day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    /// IANA zone resolved from the account when the schedule was created.
    pub timezone: String,
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncSchedule {
    fn validate(&self) -> Result<()> {
        match self.frequency {
            Frequency::Weekly if self.day_of_week.is_none() => {
                return Err(AdpilotError::InvalidInput(
                    "weekly schedules need day_of_week".to_string(),
                ))
            }
            Frequency::Monthly => match self.day_of_month {
                Some(1..=31) => {}
                Some(d) => {
                    return Err(AdpilotError::InvalidInput(format!(
                        "day_of_month must be 1..=31, got {d}"
                    )))
                }
                None => {
                    return Err(AdpilotError::InvalidInput(
                        "monthly schedules need day_of_month".to_string(),
                    ))
                }
            },
            _ => {}
        }
        self.tz()?;
        Ok(())
    }

    fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| AdpilotError::UnknownTimezone(self.timezone.clone()))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|t| t <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub account_id: String,
    pub sync_type: SyncType,
    pub frequency: Frequency,
    #[serde(default)]
    pub time_of_day: Option<NaiveTime>,
    #[serde(default)]
    pub day_of_week: Option<Weekday>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulePatch {
    #[serde(default)]
    pub sync_type: Option<SyncType>,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub time_of_day: Option<NaiveTime>,
    #[serde(default)]
    pub day_of_week: Option<Weekday>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

// ---------------------------------------------------------------------------
// compute_next_run
// ---------------------------------------------------------------------------

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn add_months(year: i32, month: u32, n: u32) -> (i32, u32) {
    let idx = year * 12 + (month as i32 - 1) + n as i32;
    (idx.div_euclid(12), idx.rem_euclid(12) as u32 + 1)
}

/// Next instant strictly after `now` at which `schedule` should fire.
///
/// Wall-clock times are interpreted in the schedule's zone; times in a DST gap
/// shift forward and repeated times take the earliest instant.
pub fn compute_next_run(schedule: &SyncSchedule, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let tz = schedule.tz()?;
    let local = now.with_timezone(&tz).naive_local();
    let today = local.date();
    let at = schedule.time_of_day;

    let first_after = |candidates: &mut dyn Iterator<Item = chrono::NaiveDateTime>| -> Result<DateTime<Utc>> {
        for naive in candidates {
            let t = resolve_local(naive, tz)?;
            if t > now {
                return Ok(t);
            }
        }
        Err(AdpilotError::InvalidInput(format!(
            "no next run found for schedule {}",
            schedule.id
        )))
    };

    match schedule.frequency {
        Frequency::Hourly => {
            // offset-aware, so a repeated local hour still gets its own run
            let zoned = now.with_timezone(&tz);
            let into_hour = Duration::minutes(i64::from(zoned.minute()))
                + Duration::seconds(i64::from(zoned.second()))
                + Duration::nanoseconds(i64::from(zoned.nanosecond()));
            Ok(now - into_hour + Duration::hours(1))
        }
        Frequency::Daily => first_after(&mut (0..=2).map(|d| (today + Duration::days(d)).and_time(at))),
        Frequency::Weekly => {
            let dow = schedule.day_of_week.ok_or_else(|| {
                AdpilotError::InvalidInput("weekly schedules need day_of_week".to_string())
            })?;
            first_after(
                &mut (0..=14)
                    .map(|d| today + Duration::days(d))
                    .filter(|d| d.weekday() == dow)
                    .map(|d| d.and_time(at)),
            )
        }
        Frequency::Monthly => {
            let dom = schedule.day_of_month.ok_or_else(|| {
                AdpilotError::InvalidInput("monthly schedules need day_of_month".to_string())
            })?;
            first_after(&mut (0..=2).filter_map(|n| {
                let (y, m) = add_months(today.year(), today.month(), n);
                let day = dom.min(last_day_of_month(y, m));
                NaiveDate::from_ymd_opt(y, m, day).map(|d| d.and_time(at))
            }))
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduleExecution / ScheduleStats
// ---------------------------------------------------------------------------

/// History record for one trigger of a schedule, across all its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleExecution {
    pub id: String,
    pub schedule_id: String,
    pub account_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    pub status: JobStatus,
    pub retry_count: u32,
    pub records_synced: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ScheduleExecution {
    fn key(&self) -> String {
        format!("{}/{}/{}", self.schedule_id, ts_key(self.started_at), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub schedule_id: String,
    pub total_executions: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Percent of finished executions that succeeded.
    pub success_rate: f64,
    pub average_duration_secs: Option<f64>,
    pub average_records: Option<f64>,
    pub total_retries: u32,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ScheduleStats {
    fn from_history(schedule_id: &str, history: &[ScheduleExecution]) -> Self {
        let finished: Vec<_> = history
            .iter()
            .filter(|e| e.status.is_terminal())
            .collect();
        let succeeded = finished
            .iter()
            .filter(|e| e.status == JobStatus::Completed)
            .count() as u32;
        let failed = finished.len() as u32 - succeeded;
        let durations: Vec<f64> = finished
            .iter()
            .filter_map(|e| e.completed_at.map(|c| (c - e.started_at).num_milliseconds() as f64 / 1000.0))
            .collect();
        let avg = |xs: &[f64]| (!xs.is_empty()).then(|| xs.iter().sum::<f64>() / xs.len() as f64);
        let records: Vec<f64> = finished.iter().map(|e| e.records_synced as f64).collect();

        Self {
            schedule_id: schedule_id.to_string(),
            total_executions: history.len() as u32,
            succeeded,
            failed,
            success_rate: if finished.is_empty() {
                0.0
            } else {
                succeeded as f64 * 100.0 / finished.len() as f64
            },
            average_duration_secs: avg(&durations),
            average_records: avg(&records),
            total_retries: history.iter().map(|e| e.retry_count).sum(),
            last_run_at: history.iter().map(|e| e.started_at).max(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    store: Arc<Store>,
    executor: Arc<SyncExecutor>,
    timezones: Arc<dyn TimezoneResolver>,
    events: EventSink,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        executor: Arc<SyncExecutor>,
        timezones: Arc<dyn TimezoneResolver>,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            executor,
            timezones,
            events,
        }
    }

    pub fn create(&self, new: NewSchedule, now: DateTime<Utc>) -> Result<SyncSchedule> {
        let tz = self.timezones.timezone_for(&new.account_id)?;
        let mut schedule = SyncSchedule {
            id: Uuid::new_v4().to_string(),
            account_id: new.account_id,
            sync_type: new.sync_type,
            frequency: new.frequency,
            time_of_day: new.time_of_day.unwrap_or(NaiveTime::MIN),
            day_of_week: new.day_of_week,
            day_of_month: new.day_of_month,
            timezone: tz.name().to_string(),
            enabled: new.enabled.unwrap_or(true),
            last_run_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        };
        schedule.validate()?;
        schedule.next_run_at = Some(compute_next_run(&schedule, now)?);
        self.store.put(SCHEDULES, &schedule.id, &schedule)?;
        info!(schedule_id = %schedule.id, account_id = %schedule.account_id, frequency = %schedule.frequency, "schedule created");
        Ok(schedule)
    }

    pub fn update(&self, id: &str, patch: SchedulePatch, now: DateTime<Utc>) -> Result<SyncSchedule> {
        let updated = self.store.update::<SyncSchedule, _>(SCHEDULES, id, |s| {
            if let Some(t) = patch.sync_type {
                s.sync_type = t;
            }
            if let Some(f) = patch.frequency {
                s.frequency = f;
            }
            if let Some(t) = patch.time_of_day {
                s.time_of_day = t;
            }
            if let Some(d) = patch.day_of_week {
                s.day_of_week = Some(d);
            }
            if let Some(d) = patch.day_of_month {
                s.day_of_month = Some(d);
            }
            if let Some(e) = patch.enabled {
                s.enabled = e;
            }
            s.validate()?;
            s.next_run_at = Some(compute_next_run(s, now)?);
            s.updated_at = now;
            Ok(())
        })?;
        updated.ok_or_else(|| AdpilotError::ScheduleNotFound(id.to_string()))
    }

    /// Remove a schedule and its execution history.
    pub fn delete(&self, id: &str) -> Result<()> {
        if !self.store.delete(SCHEDULES, id)? {
            return Err(AdpilotError::ScheduleNotFound(id.to_string()));
        }
        self.store
            .delete_prefix(SCHEDULE_EXECUTIONS, &format!("{id}/"))?;
        info!(schedule_id = %id, "schedule deleted");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<SyncSchedule> {
        self.store
            .get(SCHEDULES, id)?
            .ok_or_else(|| AdpilotError::ScheduleNotFound(id.to_string()))
    }

    pub fn list(&self, account_id: Option<&str>) -> Result<Vec<SyncSchedule>> {
        let mut all: Vec<SyncSchedule> = self
            .store
            .list::<SyncSchedule>(SCHEDULES, "")?
            .into_iter()
            .filter(|s| account_id.map_or(true, |a| a == s.account_id))
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<SyncSchedule>> {
        Ok(self
            .list(None)?
            .into_iter()
            .filter(|s| s.is_due(now))
            .collect())
    }

    /// Run the schedule once, without retry.
    pub async fn trigger(&self, id: &str) -> Result<ScheduleExecution> {
        self.trigger_with_retry(id, &RetryPolicy::new(1, std::time::Duration::ZERO))
            .await
    }

    /// Run the schedule, re-creating the job after transient failures until
    /// `policy` is exhausted. Fatal failures stop at once. The returned
    /// execution carries the final status; a failed run is not an `Err`.
    ///
    /// Ignores `enabled` and `next_run_at`; the tick goes through
    /// [`Scheduler::trigger_due`] instead.
    #[instrument(skip(self, policy), fields(max_attempts = policy.max_attempts))]
    pub async fn trigger_with_retry(&self, id: &str, policy: &RetryPolicy) -> Result<ScheduleExecution> {
        let schedule = self
            .claim(id, None)?
            .ok_or_else(|| AdpilotError::ScheduleNotFound(id.to_string()))?;
        self.run_claimed(schedule, policy).await
    }

    /// Run the schedule only if it is still due at `now`.
    ///
    /// Returns `None` when another tick already claimed the slot or the
    /// schedule was disabled after it was listed.
    #[instrument(skip(self, policy), fields(max_attempts = policy.max_attempts))]
    pub async fn trigger_due(
        &self,
        id: &str,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Result<Option<ScheduleExecution>> {
        match self.claim(id, Some(now))? {
            Some(schedule) => self.run_claimed(schedule, policy).await.map(Some),
            None => {
                debug!(schedule_id = %id, "slot already claimed");
                Ok(None)
            }
        }
    }

    /// Advance the schedule past its current slot in one write transaction.
    ///
    /// With `due_at`, a schedule that is no longer due at that instant is left
    /// untouched and `Ok(None)` is returned.
    fn claim(&self, id: &str, due_at: Option<DateTime<Utc>>) -> Result<Option<SyncSchedule>> {
        let now = Utc::now();
        let mut claimed = true;
        let schedule = self
            .store
            .update::<SyncSchedule, _>(SCHEDULES, id, |s| {
                if due_at.is_some_and(|t| !s.is_due(t)) {
                    claimed = false;
                    return Ok(());
                }
                let from = due_at.map_or(now, |t| t.max(now));
                s.last_run_at = Some(now);
                s.next_run_at = Some(compute_next_run(s, from)?);
                s.updated_at = now;
                Ok(())
            })?
            .ok_or_else(|| AdpilotError::ScheduleNotFound(id.to_string()))?;
        Ok(claimed.then_some(schedule))
    }

    async fn run_claimed(&self, schedule: SyncSchedule, policy: &RetryPolicy) -> Result<ScheduleExecution> {
        let now = schedule.last_run_at.unwrap_or_else(Utc::now);
        let mut execution = ScheduleExecution {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            account_id: schedule.account_id.clone(),
            job_id: None,
            status: JobStatus::Running,
            retry_count: 0,
            records_synced: 0,
            started_at: now,
            completed_at: None,
            error_message: None,
        };
        let key = execution.key();
        self.store.put(SCHEDULE_EXECUTIONS, &key, &execution)?;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let job = self.executor.create(SyncJob::new(
                &schedule.account_id,
                schedule.sync_type,
                JobTrigger::Schedule,
            ))?;
            execution.job_id = Some(job.id.clone());

            let outcome = self.executor.run(&job.id).await;
            let retryable = match &outcome {
                Ok(job) => {
                    execution.status = job.status;
                    execution.records_synced = job.records_synced;
                    execution.error_message = job.error_message.clone();
                    job.status == JobStatus::Failed && job.error_kind == Some(ErrorKind::Transient)
                }
                Err(e) => {
                    execution.status = JobStatus::Failed;
                    execution.error_message = Some(e.to_string());
                    false
                }
            };

            if !retryable || !policy.should_retry(attempts) {
                break;
            }
            let delay = policy.delay_after(attempts);
            warn!(
                schedule_id = %schedule.id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "transient sync failure, retrying"
            );
            execution.retry_count = attempts;
            self.store.put(SCHEDULE_EXECUTIONS, &key, &execution)?;
            tokio::time::sleep(delay).await;
        }

        execution.retry_count = attempts - 1;
        execution.completed_at = Some(Utc::now());
        self.store.put(SCHEDULE_EXECUTIONS, &key, &execution)?;

        info!(
            schedule_id = %schedule.id,
            status = %execution.status,
            retries = execution.retry_count,
            "schedule run finished"
        );
        self.events.publish(EngineEvent::ScheduleTriggered {
            schedule_id: schedule.id.clone(),
            job_id: execution.job_id.clone().unwrap_or_default(),
            status: execution.status,
            retry_count: execution.retry_count,
        });
        Ok(execution)
    }

    /// Execution history, newest first.
    pub fn history(&self, id: &str, limit: Option<usize>) -> Result<Vec<ScheduleExecution>> {
        self.get(id)?;
        let mut history: Vec<ScheduleExecution> =
            self.store.list(SCHEDULE_EXECUTIONS, &format!("{id}/"))?;
        history.reverse();
        if let Some(limit) = limit {
            history.truncate(limit);
        }
        Ok(history)
    }

    pub fn stats(&self, id: &str) -> Result<ScheduleStats> {
        let history = self.history(id, None)?;
        Ok(ScheduleStats::from_history(id, &history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RateLimitConfig};
    use crate::rate_limiter::RateLimiter;
    use crate::sync_job::tests::ScriptedApi;
    use crate::tz::ConfigTimezones;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn scheduler() -> (TempDir, Scheduler) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("db.redb")).unwrap());
        let limiter = RateLimiter::new(&RateLimitConfig {
            per_second: 100,
            per_minute: 1000,
            per_hour: 10000,
            max_queue_depth: 10,
        });
        let executor = Arc::new(SyncExecutor::new(
            store.clone(),
            Arc::new(ScriptedApi::default()),
            limiter,
            50,
            EventSink::default(),
        ));
        let timezones = Arc::new(ConfigTimezones::new(Config::default()));
        (dir, Scheduler::new(store, executor, timezones, EventSink::default()))
    }

    fn schedule(frequency: Frequency, tz: &str) -> SyncSchedule {
        let now = Utc::now();
        SyncSchedule {
            id: "s".to_string(),
            account_id: "a".to_string(),
            sync_type: SyncType::Performance,
            frequency,
            time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            day_of_week: None,
            day_of_month: None,
            timezone: tz.to_string(),
            enabled: true,
            last_run_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn hourly_is_next_hour_boundary() {
        let s = schedule(Frequency::Hourly, "UTC");
        assert_eq!(
            compute_next_run(&s, utc(2025, 3, 1, 10, 15)).unwrap(),
            utc(2025, 3, 1, 11, 0)
        );
        assert_eq!(
            compute_next_run(&s, utc(2025, 3, 1, 11, 0)).unwrap(),
            utc(2025, 3, 1, 12, 0)
        );
    }

    #[test]
    fn hourly_respects_half_hour_zones() {
        let s = schedule(Frequency::Hourly, "Asia/Kolkata");
        // 10:15Z is 15:45 IST; next local hour 16:00 IST is 10:30Z
        assert_eq!(
            compute_next_run(&s, utc(2025, 3, 1, 10, 15)).unwrap(),
            utc(2025, 3, 1, 10, 30)
        );
    }

    #[test]
    fn hourly_through_fall_back_keeps_every_hour() {
        let s = schedule(Frequency::Hourly, "America/New_York");
        // 2024-11-03 01:30 EDT, then 01:30 EST an hour later
        assert_eq!(
            compute_next_run(&s, utc(2024, 11, 3, 5, 30)).unwrap(),
            utc(2024, 11, 3, 6, 0)
        );
        assert_eq!(
            compute_next_run(&s, utc(2024, 11, 3, 6, 30)).unwrap(),
            utc(2024, 11, 3, 7, 0)
        );
    }

    #[test]
    fn daily_today_or_tomorrow() {
        let s = schedule(Frequency::Daily, "UTC");
        assert_eq!(
            compute_next_run(&s, utc(2025, 3, 1, 8, 0)).unwrap(),
            utc(2025, 3, 1, 9, 0)
        );
        assert_eq!(
            compute_next_run(&s, utc(2025, 3, 1, 9, 0)).unwrap(),
            utc(2025, 3, 2, 9, 0)
        );
    }

    #[test]
    fn daily_in_marketplace_zone() {
        let s = schedule(Frequency::Daily, "Asia/Tokyo");
        // 09:00 JST is 00:00Z
        assert_eq!(
            compute_next_run(&s, utc(2025, 3, 1, 1, 0)).unwrap(),
            utc(2025, 3, 2, 0, 0)
        );
    }

    #[test]
    fn weekly_next_matching_weekday() {
        let mut s = schedule(Frequency::Weekly, "UTC");
        s.day_of_week = Some(Weekday::Mon);
        // 2025-03-05 is a Wednesday
        assert_eq!(
            compute_next_run(&s, utc(2025, 3, 5, 12, 0)).unwrap(),
            utc(2025, 3, 10, 9, 0)
        );
        // Monday before 09:00 fires the same day
        assert_eq!(
            compute_next_run(&s, utc(2025, 3, 10, 8, 0)).unwrap(),
            utc(2025, 3, 10, 9, 0)
        );
        // Monday after 09:00 waits a week
        assert_eq!(
            compute_next_run(&s, utc(2025, 3, 10, 9, 30)).unwrap(),
            utc(2025, 3, 17, 9, 0)
        );
    }

    #[test]
    fn monthly_clamps_to_last_day() {
        let mut s = schedule(Frequency::Monthly, "UTC");
        s.day_of_month = Some(31);
        assert_eq!(
            compute_next_run(&s, utc(2025, 2, 10, 0, 0)).unwrap(),
            utc(2025, 2, 28, 9, 0)
        );
        assert_eq!(
            compute_next_run(&s, utc(2024, 2, 10, 0, 0)).unwrap(),
            utc(2024, 2, 29, 9, 0)
        );
        assert_eq!(
            compute_next_run(&s, utc(2025, 2, 28, 10, 0)).unwrap(),
            utc(2025, 3, 31, 9, 0)
        );
        assert_eq!(
            compute_next_run(&s, utc(2025, 12, 31, 10, 0)).unwrap(),
            utc(2026, 1, 31, 9, 0)
        );
    }

    #[test]
    fn daily_in_dst_gap_shifts_forward() {
        let mut s = schedule(Frequency::Daily, "America/New_York");
        s.time_of_day = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        // 2024-03-10 02:30 does not exist in New York; 03:00 EDT is 07:00Z
        assert_eq!(
            compute_next_run(&s, utc(2024, 3, 10, 5, 0)).unwrap(),
            utc(2024, 3, 10, 7, 0)
        );
    }

    #[test]
    fn next_run_is_future_and_idempotent() {
        let mut s = schedule(Frequency::Weekly, "Europe/Berlin");
        s.day_of_week = Some(Weekday::Sun);
        let mut now = utc(2024, 10, 1, 0, 0);
        for _ in 0..60 {
            let a = compute_next_run(&s, now).unwrap();
            let b = compute_next_run(&s, now).unwrap();
            assert_eq!(a, b);
            assert!(a > now);
            now += Duration::hours(37);
        }
    }

    #[test]
    fn validation_rules() {
        let mut s = schedule(Frequency::Weekly, "UTC");
        assert!(s.validate().is_err());
        s.day_of_week = Some(Weekday::Fri);
        assert!(s.validate().is_ok());

        let mut m = schedule(Frequency::Monthly, "UTC");
        m.day_of_month = Some(32);
        assert!(m.validate().is_err());
        m.day_of_month = Some(1);
        assert!(m.validate().is_ok());

        let bad_tz = schedule(Frequency::Daily, "Nowhere/City");
        assert!(matches!(
            bad_tz.validate(),
            Err(AdpilotError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn stats_from_history() {
        let start = utc(2025, 1, 1, 0, 0);
        let exec = |status, secs: i64, records, retries| ScheduleExecution {
            id: Uuid::new_v4().to_string(),
            schedule_id: "s".to_string(),
            account_id: "a".to_string(),
            job_id: None,
            status,
            retry_count: retries,
            records_synced: records,
            started_at: start + Duration::hours(secs),
            completed_at: Some(start + Duration::hours(secs) + Duration::seconds(secs)),
            error_message: None,
        };
        let history = vec![
            exec(JobStatus::Completed, 10, 100, 0),
            exec(JobStatus::Completed, 20, 300, 1),
            exec(JobStatus::Failed, 30, 0, 2),
            exec(JobStatus::Completed, 40, 200, 0),
        ];
        let stats = ScheduleStats::from_history("s", &history);
        assert_eq!(stats.total_executions, 4);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!(stats.average_duration_secs, Some(25.0));
        assert_eq!(stats.average_records, Some(150.0));
        assert_eq!(stats.total_retries, 3);
        assert_eq!(stats.last_run_at, Some(start + Duration::hours(40)));
    }

    #[tokio::test]
    async fn a_due_slot_fires_once_across_overlapping_ticks() {
        let (_dir, scheduler) = scheduler();
        let s = scheduler
            .create(
                NewSchedule {
                    account_id: "a".to_string(),
                    sync_type: SyncType::Campaigns,
                    frequency: Frequency::Hourly,
                    time_of_day: None,
                    day_of_week: None,
                    day_of_month: None,
                    enabled: None,
                },
                Utc::now(),
            )
            .unwrap();
        let slot = s.next_run_at.unwrap() + Duration::seconds(1);

        // both ticks list the schedule before either claims it
        let first = scheduler.due(slot).unwrap();
        let second = scheduler.due(slot).unwrap();
        assert_eq!((first.len(), second.len()), (1, 1));

        let policy = RetryPolicy::new(1, std::time::Duration::ZERO);
        let a = scheduler.trigger_due(&first[0].id, slot, &policy).await.unwrap();
        let b = scheduler.trigger_due(&second[0].id, slot, &policy).await.unwrap();
        assert_eq!(a.map(|e| e.status), Some(JobStatus::Completed));
        assert!(b.is_none());
        assert_eq!(scheduler.history(&s.id, None).unwrap().len(), 1);
        assert!(scheduler.get(&s.id).unwrap().next_run_at.unwrap() > slot);
        assert!(scheduler.due(slot).unwrap().is_empty());

        // a manual trigger is not bound to the slot
        scheduler.trigger(&s.id).await.unwrap();
        assert_eq!(scheduler.history(&s.id, None).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_after_listing_is_not_fired() {
        let (_dir, scheduler) = scheduler();
        let s = scheduler
            .create(
                NewSchedule {
                    account_id: "a".to_string(),
                    sync_type: SyncType::Campaigns,
                    frequency: Frequency::Hourly,
                    time_of_day: None,
                    day_of_week: None,
                    day_of_month: None,
                    enabled: None,
                },
                Utc::now(),
            )
            .unwrap();
        let slot = s.next_run_at.unwrap() + Duration::seconds(1);
        let listed = scheduler.due(slot).unwrap();
        scheduler
            .update(
                &s.id,
                SchedulePatch {
                    enabled: Some(false),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();
        let policy = RetryPolicy::new(1, std::time::Duration::ZERO);
        assert!(scheduler
            .trigger_due(&listed[0].id, slot, &policy)
            .await
            .unwrap()
            .is_none());
        assert!(scheduler.history(&s.id, None).unwrap().is_empty());
    }
}

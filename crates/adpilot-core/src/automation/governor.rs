//! Policy gate between proposed actions and the live ads account.
//!
//! [`evaluate`] is the pure decision procedure. [`Governor`] applies it to a
//! proposal list, executes what it admits through the shared rate limiter,
//! and writes every outcome to the ledger.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api::AdsApi;
use crate::automation::action::{ActionChange, ProposedAction};
use crate::automation::config::{AutomationConfig, AutomationPatch, SafetyBoundary};
use crate::automation::daily_stats::{DailyExecutionStats, DailyStats};
use crate::error::{AdpilotError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::ledger::{detail_id, BatchRecord, ExecutionBatch, ExecutionDetail, Ledger};
use crate::rate_limiter::RateLimiter;
use crate::store::{Store, APPROVALS, AUTOMATION_CONFIGS, DETAILS};
use crate::types::{ActionType, AutomationMode, DetailStatus};
use crate::tz::{local_date, TimezoneResolver};

// ---------------------------------------------------------------------------
// Decision procedure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Hard refusal: stopped, disabled, or a safety cap would be exceeded.
    Blocked(String),
    /// Soft refusal: type not enabled or a daily count cap reached.
    Skipped(String),
    /// Admit now. `notify` marks supervised-band executions.
    Execute { notify: bool },
    HoldForApproval(String),
}

/// Decide what to do with one proposed action given the account's config and
/// today's counters. Checks run in a fixed order and the first refusal wins.
pub fn evaluate(
    cfg: &AutomationConfig,
    action: &ProposedAction,
    today: &DailyExecutionStats,
) -> Decision {
    if let Some(reason) = cfg.block_reason() {
        return Decision::Blocked(reason);
    }

    let action_type = action.action_type();
    if !cfg.enabled_types.contains(&action_type) {
        return Decision::Skipped(format!("action type {action_type} is not enabled"));
    }
    if !(0.0..=1.0).contains(&action.confidence) {
        return Decision::Skipped(format!("confidence {} is outside 0..=1", action.confidence));
    }

    let safety = &cfg.safety;
    if let (Some(magnitude), Some(cap)) = (
        action.change.magnitude_percent(),
        safety.change_cap(action_type),
    ) {
        if magnitude.is_nan() || cap.is_nan() || magnitude > cap {
            return Decision::Blocked(format!(
                "change of {magnitude:.1}% exceeds the {cap}% cap for {action_type}"
            ));
        }
    }

    if let Some(reason) = today.cap_reached(action_type, safety) {
        return Decision::Skipped(reason);
    }

    let confidence = action.confidence * 100.0;
    if confidence >= safety.auto_execute_confidence {
        Decision::Execute { notify: false }
    } else if confidence >= safety.supervised_confidence && cfg.mode != AutomationMode::Approval {
        Decision::Execute { notify: true }
    } else if cfg.mode == AutomationMode::Approval {
        Decision::HoldForApproval("approval mode requires manual review".to_string())
    } else {
        Decision::HoldForApproval(format!(
            "confidence {confidence:.0} is below the supervised threshold {}",
            safety.supervised_confidence
        ))
    }
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// An action held for manual review. Resolving it never edits the original
/// ledger entry; approval writes a new batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub account_id: String,
    pub action: ProposedAction,
    pub detail_id: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution_batch_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Cycle guard
// ---------------------------------------------------------------------------

type InFlight = Arc<Mutex<HashSet<String>>>;

fn lock(set: &InFlight) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

/// Marks an account as having a cycle in flight until dropped.
struct CycleGuard {
    in_flight: InFlight,
    account_id: String,
}

impl CycleGuard {
    fn acquire(in_flight: &InFlight, account_id: &str) -> Result<Self> {
        if !lock(in_flight).insert(account_id.to_string()) {
            return Err(AdpilotError::CycleInProgress(account_id.to_string()));
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            account_id: account_id.to_string(),
        })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.account_id);
    }
}

// ---------------------------------------------------------------------------
// Governor
// ---------------------------------------------------------------------------

pub struct Governor {
    store: Arc<Store>,
    ledger: Ledger,
    daily: DailyStats,
    api: Arc<dyn AdsApi>,
    limiter: RateLimiter,
    timezones: Arc<dyn TimezoneResolver>,
    defaults: SafetyBoundary,
    events: EventSink,
    in_flight: InFlight,
}

/// Where a batch of actions came from; decides how routing is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Cycle,
    /// Manually approved: confidence routing no longer applies.
    Approval,
}

impl Governor {
    pub fn new(
        store: Arc<Store>,
        api: Arc<dyn AdsApi>,
        limiter: RateLimiter,
        timezones: Arc<dyn TimezoneResolver>,
        defaults: SafetyBoundary,
        events: EventSink,
    ) -> Self {
        Self {
            ledger: Ledger::new(Arc::clone(&store)),
            daily: DailyStats::new(Arc::clone(&store)),
            store,
            api,
            limiter,
            timezones,
            defaults,
            events,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    // -- configuration ------------------------------------------------------

    /// Stored config, or the defaults for an account never configured.
    pub fn config(&self, account_id: &str) -> Result<AutomationConfig> {
        Ok(self
            .store
            .get(AUTOMATION_CONFIGS, account_id)?
            .unwrap_or_else(|| AutomationConfig::new(account_id, self.defaults.clone())))
    }

    pub fn update_config(&self, account_id: &str, patch: AutomationPatch) -> Result<AutomationConfig> {
        let (cfg, ()) = self.store.upsert(
            AUTOMATION_CONFIGS,
            account_id,
            || AutomationConfig::new(account_id, self.defaults.clone()),
            |cfg: &mut AutomationConfig| cfg.apply(patch),
        )?;
        info!(account_id, enabled = cfg.enabled, mode = %cfg.mode, "automation config updated");
        Ok(cfg)
    }

    /// Refuse all new admissions for the account until [`resume`](Self::resume).
    pub fn emergency_stop(&self, account_id: &str, reason: &str) -> Result<AutomationConfig> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AdpilotError::InvalidInput(
                "emergency stop requires a reason".to_string(),
            ));
        }
        let now = Utc::now();
        let (cfg, ()) = self.store.upsert(
            AUTOMATION_CONFIGS,
            account_id,
            || AutomationConfig::new(account_id, self.defaults.clone()),
            |cfg: &mut AutomationConfig| {
                cfg.blocked_reason = Some(reason.to_string());
                cfg.blocked_at = Some(now);
                cfg.enabled = false;
                cfg.updated_at = now;
                Ok(())
            },
        )?;
        warn!(account_id, reason, "automation emergency stop");
        self.events.publish(EngineEvent::EmergencyStop {
            account_id: account_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(cfg)
    }

    /// Clear an emergency stop and re-enable. Applied changes stay applied.
    pub fn resume(&self, account_id: &str) -> Result<AutomationConfig> {
        let now = Utc::now();
        let (cfg, ()) = self.store.upsert(
            AUTOMATION_CONFIGS,
            account_id,
            || AutomationConfig::new(account_id, self.defaults.clone()),
            |cfg: &mut AutomationConfig| {
                cfg.blocked_reason = None;
                cfg.blocked_at = None;
                cfg.enabled = true;
                cfg.updated_at = now;
                Ok(())
            },
        )?;
        info!(account_id, "automation resumed");
        self.events.publish(EngineEvent::Resumed {
            account_id: account_id.to_string(),
        });
        Ok(cfg)
    }

    // -- queries ------------------------------------------------------------

    fn today(&self, account_id: &str) -> Result<(Tz, NaiveDate)> {
        let tz = self.timezones.timezone_for(account_id)?;
        Ok((tz, local_date(Utc::now(), tz)))
    }

    /// Counters for `date`, or for the account's current local day.
    pub fn daily_stats(&self, account_id: &str, date: Option<NaiveDate>) -> Result<DailyExecutionStats> {
        let date = match date {
            Some(d) => d,
            None => self.today(account_id)?.1,
        };
        self.daily.get(account_id, date)
    }

    pub fn recent_daily_stats(&self, account_id: &str, limit: usize) -> Result<Vec<DailyExecutionStats>> {
        self.daily.recent(account_id, limit)
    }

    pub fn history(&self, account_id: &str, limit: Option<usize>) -> Result<Vec<BatchRecord>> {
        self.ledger.history(account_id, limit)
    }

    pub fn detail(&self, detail_id: &str) -> Result<ExecutionDetail> {
        self.ledger.detail(detail_id)
    }

    pub fn pending_approvals(&self, account_id: Option<&str>) -> Result<Vec<PendingApproval>> {
        let mut out: Vec<PendingApproval> = self
            .store
            .list::<PendingApproval>(APPROVALS, "")?
            .into_iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .filter(|a| account_id.map_or(true, |id| a.account_id == id))
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    fn approval(&self, approval_id: &str) -> Result<PendingApproval> {
        self.store
            .get(APPROVALS, approval_id)?
            .ok_or_else(|| AdpilotError::ApprovalNotFound(approval_id.to_string()))
    }

    // -- cycles -------------------------------------------------------------

    /// Evaluate every proposal once, execute what is admitted and record a
    /// batch. Refused with `CycleInProgress` while another cycle for the same
    /// account is running.
    #[instrument(skip(self, proposals), fields(proposals = proposals.len()))]
    pub async fn run_full_cycle(
        &self,
        account_id: &str,
        proposals: Vec<ProposedAction>,
    ) -> Result<BatchRecord> {
        let _guard = CycleGuard::acquire(&self.in_flight, account_id)?;
        let record = self.process(account_id, proposals, Origin::Cycle).await?;
        let b = &record.batch;
        info!(
            batch_id = %b.batch_id,
            applied = b.success_items,
            blocked = b.blocked_items,
            skipped = b.skipped_items,
            pending = b.pending_items,
            errors = b.failed_items,
            "automation cycle complete"
        );
        Ok(record)
    }

    /// Execute a held action. Safety and daily caps are checked again; an
    /// emergency stop or disabled account leaves it pending, and so does a
    /// re-check that blocks or skips it. The approval is resolved only once
    /// the change was sent.
    #[instrument(skip(self))]
    pub async fn approve(&self, approval_id: &str) -> Result<BatchRecord> {
        let approval = self.approval(approval_id)?;
        if approval.status != ApprovalStatus::Pending {
            return Err(not_pending(&approval, "approved"));
        }
        let account_id = approval.account_id.clone();
        self.ensure_admitting(&account_id)?;

        let _guard = CycleGuard::acquire(&self.in_flight, &account_id)?;
        let record = self
            .process(&account_id, vec![approval.action.clone()], Origin::Approval)
            .await?;

        let sent = record
            .details
            .iter()
            .all(|d| matches!(d.status, DetailStatus::Applied | DetailStatus::Error));
        if !sent {
            warn!(
                account_id = %account_id,
                approval_id,
                batch_id = %record.batch.batch_id,
                "approved action refused on re-check; left pending"
            );
            return Ok(record);
        }

        let batch_id = record.batch.batch_id.clone();
        self.store.update::<PendingApproval, _>(APPROVALS, approval_id, |a| {
            if a.status != ApprovalStatus::Pending {
                return Err(not_pending(a, "approved"));
            }
            a.status = ApprovalStatus::Approved;
            a.resolved_at = Some(Utc::now());
            a.resolution_batch_id = Some(batch_id);
            Ok(())
        })?;
        info!(account_id = %account_id, batch_id = %record.batch.batch_id, "held action approved");
        Ok(record)
    }

    pub fn reject(&self, approval_id: &str) -> Result<PendingApproval> {
        let approval = self
            .store
            .update::<PendingApproval, _>(APPROVALS, approval_id, |a| {
                if a.status != ApprovalStatus::Pending {
                    return Err(not_pending(a, "rejected"));
                }
                a.status = ApprovalStatus::Rejected;
                a.resolved_at = Some(Utc::now());
                Ok(())
            })?
            .ok_or_else(|| AdpilotError::ApprovalNotFound(approval_id.to_string()))?;
        info!(account_id = %approval.account_id, approval_id, "held action rejected");
        Ok(approval)
    }

    /// Restore the `before` value of an applied change.
    ///
    /// Rollbacks skip type, magnitude and daily caps but are refused while
    /// the account is stopped or disabled. Each detail can be rolled back
    /// once.
    #[instrument(skip(self))]
    pub async fn rollback(&self, detail_id: &str) -> Result<BatchRecord> {
        let original = self.ledger.detail(detail_id)?;
        if original.status != DetailStatus::Applied {
            return Err(AdpilotError::InvalidInput(format!(
                "only applied changes can be rolled back; '{detail_id}' is {}",
                original.status
            )));
        }
        if original.action_type == ActionType::Rollback {
            return Err(AdpilotError::InvalidInput(
                "a rollback cannot itself be rolled back".to_string(),
            ));
        }
        if self.rolled_back(&original)? {
            return Err(AdpilotError::InvalidInput(format!(
                "'{detail_id}' has already been rolled back"
            )));
        }
        let account_id = original.account_id.clone();
        self.ensure_admitting(&account_id)?;
        let _guard = CycleGuard::acquire(&self.in_flight, &account_id)?;

        let action = ProposedAction {
            target_id: original.target_id.clone(),
            confidence: 1.0,
            change: ActionChange::Rollback {
                detail_id: original.id.clone(),
                original_type: original.action_type,
                from: original.after.clone(),
                to: original.before.clone(),
            },
            reason: Some(format!("rollback of {}", original.id)),
        };

        let (tz, _) = self.today(&account_id)?;
        let batch_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let date = local_date(created_at, tz);

        let (status, reason) = match self.call_api(&account_id, &action).await {
            Ok(()) => {
                self.daily
                    .record_uncapped(&account_id, date, ActionType::Rollback)?;
                (DetailStatus::Applied, None)
            }
            Err(e) => (DetailStatus::Error, Some(e.to_string())),
        };
        let detail = self.make_detail(&batch_id, 0, &account_id, &action, status, reason, false);
        self.daily.note(&account_id, date, status)?;
        self.ledger.append_detail(&detail)?;

        let details = vec![detail];
        let batch = ExecutionBatch::summarize(&batch_id, &account_id, created_at, &details);
        self.ledger.close_batch(&batch)?;
        self.publish_cycle(&batch);
        info!(account_id = %account_id, status = %status, "rollback finished");
        Ok(BatchRecord { batch, details })
    }

    // -- internals ----------------------------------------------------------

    fn ensure_admitting(&self, account_id: &str) -> Result<()> {
        match self.config(account_id)?.block_reason() {
            Some(reason) => Err(AdpilotError::AutomationStopped {
                account_id: account_id.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn rolled_back(&self, original: &ExecutionDetail) -> Result<bool> {
        Ok(self
            .store
            .list::<ExecutionDetail>(DETAILS, "")?
            .iter()
            .any(|d| {
                d.account_id == original.account_id
                    && d.status == DetailStatus::Applied
                    && matches!(&d.action.change, ActionChange::Rollback { detail_id, .. } if *detail_id == original.id)
            }))
    }

    async fn process(
        &self,
        account_id: &str,
        proposals: Vec<ProposedAction>,
        origin: Origin,
    ) -> Result<BatchRecord> {
        let tz = self.timezones.timezone_for(account_id)?;
        let batch_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let mut details = Vec::with_capacity(proposals.len());

        for (seq, action) in proposals.into_iter().enumerate() {
            // re-read per action so a stop issued mid-cycle takes effect
            let cfg = self.config(account_id)?;
            let date = local_date(Utc::now(), tz);
            let today = self.daily.get(account_id, date)?;

            let decision = match (origin, evaluate(&cfg, &action, &today)) {
                (Origin::Approval, Decision::HoldForApproval(_)) => Decision::Execute { notify: false },
                (_, d) => d,
            };

            let (status, reason, notify) = match decision {
                Decision::Blocked(r) => (DetailStatus::Blocked, Some(r), false),
                Decision::Skipped(r) => (DetailStatus::Skipped, Some(r), false),
                Decision::HoldForApproval(r) => (DetailStatus::PendingApproval, Some(r), false),
                Decision::Execute { notify } => {
                    let (status, reason) = self.execute(account_id, date, &cfg, &action).await?;
                    (status, reason, notify && status == DetailStatus::Applied)
                }
            };

            let detail = self.make_detail(&batch_id, seq, account_id, &action, status, reason, notify);
            self.daily.note(account_id, date, status)?;
            self.ledger.append_detail(&detail)?;
            if status == DetailStatus::PendingApproval {
                self.hold(&detail)?;
            }
            match status {
                DetailStatus::Applied | DetailStatus::PendingApproval => {}
                _ => info!(
                    target_id = %detail.target_id,
                    status = %status,
                    reason = detail.reason.as_deref().unwrap_or_default(),
                    "action not applied"
                ),
            }
            details.push(detail);
        }

        let batch = ExecutionBatch::summarize(&batch_id, account_id, created_at, &details);
        self.ledger.close_batch(&batch)?;
        self.publish_cycle(&batch);
        Ok(BatchRecord { batch, details })
    }

    /// Count the action against today's caps, then apply it.
    ///
    /// Losing the cap race is a skip; an API failure after admission is an
    /// error. `Err` is reserved for storage failures.
    async fn execute(
        &self,
        account_id: &str,
        date: NaiveDate,
        cfg: &AutomationConfig,
        action: &ProposedAction,
    ) -> Result<(DetailStatus, Option<String>)> {
        if let Some(reason) = self
            .daily
            .try_reserve(account_id, date, action.action_type(), &cfg.safety)?
        {
            return Ok((DetailStatus::Skipped, Some(reason)));
        }
        match self.call_api(account_id, action).await {
            Ok(()) => Ok((DetailStatus::Applied, None)),
            Err(e) => {
                warn!(target_id = %action.target_id, error = %e, "change failed after admission");
                Ok((DetailStatus::Error, Some(e.to_string())))
            }
        }
    }

    async fn call_api(&self, account_id: &str, action: &ProposedAction) -> Result<()> {
        self.limiter.acquire_patiently(1).await?;
        self.api.apply_change(account_id, action).await
    }

    fn hold(&self, detail: &ExecutionDetail) -> Result<()> {
        let approval = PendingApproval {
            id: Uuid::new_v4().to_string(),
            account_id: detail.account_id.clone(),
            action: detail.action.clone(),
            detail_id: detail.id.clone(),
            status: ApprovalStatus::Pending,
            created_at: detail.created_at,
            resolved_at: None,
            resolution_batch_id: None,
        };
        self.store.put(APPROVALS, &approval.id, &approval)
    }

    #[allow(clippy::too_many_arguments)]
    fn make_detail(
        &self,
        batch_id: &str,
        seq: usize,
        account_id: &str,
        action: &ProposedAction,
        status: DetailStatus,
        reason: Option<String>,
        notify: bool,
    ) -> ExecutionDetail {
        ExecutionDetail {
            id: detail_id(batch_id, seq),
            batch_id: batch_id.to_string(),
            account_id: account_id.to_string(),
            target_id: action.target_id.clone(),
            action_type: action.action_type(),
            action: action.clone(),
            before: action.change.before(),
            after: action.change.after(),
            status,
            reason,
            confidence: action.confidence,
            notify,
            created_at: Utc::now(),
        }
    }

    fn publish_cycle(&self, batch: &ExecutionBatch) {
        self.events.publish(EngineEvent::CycleCompleted {
            account_id: batch.account_id.clone(),
            batch_id: batch.batch_id.clone(),
            applied: batch.success_items,
            blocked: batch.blocked_items,
            skipped: batch.skipped_items,
            pending_approval: batch.pending_items,
        });
    }
}

fn not_pending(approval: &PendingApproval, to: &str) -> AdpilotError {
    AdpilotError::InvalidTransition {
        from: format!("{:?}", approval.status).to_lowercase(),
        to: to.to_string(),
        reason: "approval is no longer pending".to_string(),
    }
}

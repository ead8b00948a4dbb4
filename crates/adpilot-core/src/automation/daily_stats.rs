//! Per-account execution counters for one marketplace-local calendar day.
//!
//! Each local day has its own record (`<account>/<YYYY-MM-DD>`), so counters
//! start from zero exactly when the account's local date changes. Counters
//! only ever increase.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::automation::config::SafetyBoundary;
use crate::error::Result;
use crate::store::{Store, DAILY_STATS};
use crate::types::{ActionType, DetailStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyExecutionStats {
    pub account_id: String,
    pub date: NaiveDate,
    pub bid_adjustments: u32,
    pub budget_adjustments: u32,
    pub placement_adjustments: u32,
    pub negative_keywords: u32,
    pub dayparting_adjustments: u32,
    pub rollbacks: u32,
    pub total_adjustments: u32,
    pub blocked: u32,
    pub skipped: u32,
    pub pending_approval: u32,
    pub errors: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DailyExecutionStats {
    pub fn empty(account_id: &str, date: NaiveDate) -> Self {
        Self {
            account_id: account_id.to_string(),
            date,
            bid_adjustments: 0,
            budget_adjustments: 0,
            placement_adjustments: 0,
            negative_keywords: 0,
            dayparting_adjustments: 0,
            rollbacks: 0,
            total_adjustments: 0,
            blocked: 0,
            skipped: 0,
            pending_approval: 0,
            errors: 0,
            updated_at: None,
        }
    }

    pub fn count(&self, action_type: ActionType) -> u32 {
        match action_type {
            ActionType::BidAdjustment => self.bid_adjustments,
            ActionType::BudgetAdjustment => self.budget_adjustments,
            ActionType::PlacementAdjustment => self.placement_adjustments,
            ActionType::NegativeKeyword => self.negative_keywords,
            ActionType::Dayparting => self.dayparting_adjustments,
            ActionType::Rollback => self.rollbacks,
        }
    }

    fn count_mut(&mut self, action_type: ActionType) -> &mut u32 {
        match action_type {
            ActionType::BidAdjustment => &mut self.bid_adjustments,
            ActionType::BudgetAdjustment => &mut self.budget_adjustments,
            ActionType::PlacementAdjustment => &mut self.placement_adjustments,
            ActionType::NegativeKeyword => &mut self.negative_keywords,
            ActionType::Dayparting => &mut self.dayparting_adjustments,
            ActionType::Rollback => &mut self.rollbacks,
        }
    }

    /// The cap that one more action of this type would exceed, if any.
    pub fn cap_reached(&self, action_type: ActionType, safety: &SafetyBoundary) -> Option<String> {
        if let Some(cap) = safety.daily_cap(action_type) {
            if self.count(action_type) >= cap {
                return Some(format!("daily {action_type} limit of {cap} reached"));
            }
        }
        if self.total_adjustments >= safety.max_daily_total_adjustments {
            return Some(format!(
                "daily total limit of {} reached",
                safety.max_daily_total_adjustments
            ));
        }
        None
    }
}

fn key(account_id: &str, date: NaiveDate) -> String {
    format!("{account_id}/{date}")
}

pub struct DailyStats {
    store: Arc<Store>,
}

impl DailyStats {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, account_id: &str, date: NaiveDate) -> Result<DailyExecutionStats> {
        Ok(self
            .store
            .get(DAILY_STATS, &key(account_id, date))?
            .unwrap_or_else(|| DailyExecutionStats::empty(account_id, date)))
    }

    /// Days with recorded activity, newest first.
    pub fn recent(&self, account_id: &str, limit: usize) -> Result<Vec<DailyExecutionStats>> {
        let mut days: Vec<DailyExecutionStats> =
            self.store.list(DAILY_STATS, &format!("{account_id}/"))?;
        days.reverse();
        days.truncate(limit);
        Ok(days)
    }

    /// Count one execution against the caps, in a single transaction.
    ///
    /// Returns the cap that refused it, or `None` once counted.
    pub fn try_reserve(
        &self,
        account_id: &str,
        date: NaiveDate,
        action_type: ActionType,
        safety: &SafetyBoundary,
    ) -> Result<Option<String>> {
        let (_, refused) = self.store.upsert(
            DAILY_STATS,
            &key(account_id, date),
            || DailyExecutionStats::empty(account_id, date),
            |s: &mut DailyExecutionStats| {
                if let Some(reason) = s.cap_reached(action_type, safety) {
                    return Ok(Some(reason));
                }
                *s.count_mut(action_type) += 1;
                s.total_adjustments += 1;
                s.updated_at = Some(Utc::now());
                Ok(None)
            },
        )?;
        Ok(refused)
    }

    /// Count an execution without checking caps (rollbacks).
    pub fn record_uncapped(&self, account_id: &str, date: NaiveDate, action_type: ActionType) -> Result<()> {
        self.store.upsert(
            DAILY_STATS,
            &key(account_id, date),
            || DailyExecutionStats::empty(account_id, date),
            |s: &mut DailyExecutionStats| {
                *s.count_mut(action_type) += 1;
                s.total_adjustments += 1;
                s.updated_at = Some(Utc::now());
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Count a non-applied outcome.
    pub fn note(&self, account_id: &str, date: NaiveDate, status: DetailStatus) -> Result<()> {
        if status == DetailStatus::Applied {
            return Ok(());
        }
        self.store.upsert(
            DAILY_STATS,
            &key(account_id, date),
            || DailyExecutionStats::empty(account_id, date),
            |s: &mut DailyExecutionStats| {
                match status {
                    DetailStatus::Blocked => s.blocked += 1,
                    DetailStatus::Skipped => s.skipped += 1,
                    DetailStatus::PendingApproval => s.pending_approval += 1,
                    DetailStatus::Error => s.errors += 1,
                    DetailStatus::Applied => {}
                }
                s.updated_at = Some(Utc::now());
                Ok(())
            },
        )?;
        Ok(())
    }
}

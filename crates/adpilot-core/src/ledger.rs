//! Append-only record of automated actions.
//!
//! Every evaluated action becomes an [`ExecutionDetail`], whatever its
//! outcome. A cycle closes with one [`ExecutionBatch`] summarizing its
//! details. Both are written with insert-only semantics and never change
//! afterwards.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::automation::action::ProposedAction;
use crate::error::{AdpilotError, Result};
use crate::store::{ts_key, Store, BATCHES, DETAILS};
use crate::types::{ActionType, DetailStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetail {
    pub id: String,
    pub batch_id: String,
    pub account_id: String,
    pub target_id: String,
    pub action_type: ActionType,
    pub action: ProposedAction,
    pub before: Value,
    pub after: Value,
    pub status: DetailStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub confidence: f64,
    /// Executed below the auto-execute threshold; someone should be told.
    #[serde(default)]
    pub notify: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionBatch {
    pub batch_id: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub total_items: u32,
    pub success_items: u32,
    pub failed_items: u32,
    pub skipped_items: u32,
    pub blocked_items: u32,
    pub pending_items: u32,
    pub notified_items: u32,
}

impl ExecutionBatch {
    pub fn summarize(
        batch_id: &str,
        account_id: &str,
        created_at: DateTime<Utc>,
        details: &[ExecutionDetail],
    ) -> Self {
        let count = |s: DetailStatus| details.iter().filter(|d| d.status == s).count() as u32;
        Self {
            batch_id: batch_id.to_string(),
            account_id: account_id.to_string(),
            created_at,
            total_items: details.len() as u32,
            success_items: count(DetailStatus::Applied),
            failed_items: count(DetailStatus::Error),
            skipped_items: count(DetailStatus::Skipped),
            blocked_items: count(DetailStatus::Blocked),
            pending_items: count(DetailStatus::PendingApproval),
            notified_items: details.iter().filter(|d| d.notify).count() as u32,
        }
    }

    fn key(&self) -> String {
        format!("{}/{}/{}", self.account_id, ts_key(self.created_at), self.batch_id)
    }
}

/// A batch together with its details, as returned by history queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    #[serde(flatten)]
    pub batch: ExecutionBatch,
    pub details: Vec<ExecutionDetail>,
}

pub fn detail_id(batch_id: &str, seq: usize) -> String {
    format!("{batch_id}-{seq:04}")
}

pub struct Ledger {
    store: Arc<Store>,
}

impl Ledger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn append_detail(&self, detail: &ExecutionDetail) -> Result<()> {
        if !self.store.insert_new(DETAILS, &detail.id, detail)? {
            return Err(AdpilotError::Storage(format!(
                "ledger detail '{}' already written",
                detail.id
            )));
        }
        Ok(())
    }

    pub fn close_batch(&self, batch: &ExecutionBatch) -> Result<()> {
        if !self.store.insert_new(BATCHES, &batch.key(), batch)? {
            return Err(AdpilotError::Storage(format!(
                "ledger batch '{}' already written",
                batch.batch_id
            )));
        }
        Ok(())
    }

    pub fn detail(&self, detail_id: &str) -> Result<ExecutionDetail> {
        self.store
            .get(DETAILS, detail_id)?
            .ok_or_else(|| AdpilotError::DetailNotFound(detail_id.to_string()))
    }

    pub fn details(&self, batch_id: &str) -> Result<Vec<ExecutionDetail>> {
        self.store.list(DETAILS, &format!("{batch_id}-"))
    }

    /// Batches for `account_id`, newest first, with their details.
    pub fn history(&self, account_id: &str, limit: Option<usize>) -> Result<Vec<BatchRecord>> {
        let mut batches: Vec<ExecutionBatch> =
            self.store.list(BATCHES, &format!("{account_id}/"))?;
        batches.reverse();
        if let Some(limit) = limit {
            batches.truncate(limit);
        }
        batches
            .into_iter()
            .map(|batch| {
                let details = self.details(&batch.batch_id)?;
                Ok(BatchRecord { batch, details })
            })
            .collect()
    }
}

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AdpilotError, Result};
use crate::types::{ActionType, AutomationMode};

// ---------------------------------------------------------------------------
// SafetyBoundary
// ---------------------------------------------------------------------------

/// Caps on a single change and on the number of changes per local day.
/// Confidence thresholds are percentages (0..=100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyBoundary {
    #[serde(default = "default_max_bid_change")]
    pub max_bid_change_percent: f64,
    #[serde(default = "default_max_budget_change")]
    pub max_budget_change_percent: f64,
    #[serde(default = "default_auto_confidence")]
    pub auto_execute_confidence: f64,
    #[serde(default = "default_supervised_confidence")]
    pub supervised_confidence: f64,
    #[serde(default = "default_daily_bid")]
    pub max_daily_bid_adjustments: u32,
    #[serde(default = "default_daily_budget")]
    pub max_daily_budget_adjustments: u32,
    #[serde(default = "default_daily_total")]
    pub max_daily_total_adjustments: u32,
}

fn default_max_bid_change() -> f64 {
    30.0
}

fn default_max_budget_change() -> f64 {
    50.0
}

fn default_auto_confidence() -> f64 {
    80.0
}

fn default_supervised_confidence() -> f64 {
    60.0
}

fn default_daily_bid() -> u32 {
    50
}

fn default_daily_budget() -> u32 {
    20
}

fn default_daily_total() -> u32 {
    100
}

impl Default for SafetyBoundary {
    fn default() -> Self {
        Self {
            max_bid_change_percent: default_max_bid_change(),
            max_budget_change_percent: default_max_budget_change(),
            auto_execute_confidence: default_auto_confidence(),
            supervised_confidence: default_supervised_confidence(),
            max_daily_bid_adjustments: default_daily_bid(),
            max_daily_budget_adjustments: default_daily_budget(),
            max_daily_total_adjustments: default_daily_total(),
        }
    }
}

impl SafetyBoundary {
    pub fn validate(&self) -> Result<()> {
        let pct = |name: &str, v: f64| {
            if !(0.0..=100.0).contains(&v) {
                Err(AdpilotError::InvalidInput(format!(
                    "{name} must be within 0..=100, got {v}"
                )))
            } else {
                Ok(())
            }
        };
        pct("auto_execute_confidence", self.auto_execute_confidence)?;
        pct("supervised_confidence", self.supervised_confidence)?;
        if self.supervised_confidence > self.auto_execute_confidence {
            return Err(AdpilotError::InvalidInput(format!(
                "supervised_confidence ({}) must not exceed auto_execute_confidence ({})",
                self.supervised_confidence, self.auto_execute_confidence
            )));
        }
        for (name, cap) in [
            ("max_bid_change_percent", self.max_bid_change_percent),
            ("max_budget_change_percent", self.max_budget_change_percent),
        ] {
            if !cap.is_finite() || cap <= 0.0 {
                return Err(AdpilotError::InvalidInput(format!(
                    "{name} must be a positive number, got {cap}"
                )));
            }
        }
        Ok(())
    }

    /// Magnitude cap for a change of this type, if it has one.
    pub fn change_cap(&self, action_type: ActionType) -> Option<f64> {
        match action_type {
            ActionType::BidAdjustment
            | ActionType::PlacementAdjustment
            | ActionType::Dayparting => Some(self.max_bid_change_percent),
            ActionType::BudgetAdjustment => Some(self.max_budget_change_percent),
            ActionType::NegativeKeyword | ActionType::Rollback => None,
        }
    }

    /// Per-type daily cap, if the type has one. The total cap applies to all.
    pub fn daily_cap(&self, action_type: ActionType) -> Option<u32> {
        match action_type {
            ActionType::BidAdjustment => Some(self.max_daily_bid_adjustments),
            ActionType::BudgetAdjustment => Some(self.max_daily_budget_adjustments),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AutomationConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub account_id: String,
    pub enabled: bool,
    pub mode: AutomationMode,
    pub enabled_types: BTreeSet<ActionType>,
    pub safety: SafetyBoundary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationConfig {
    /// New accounts start disabled in supervised mode with every regular
    /// action type enabled.
    pub fn new(account_id: impl Into<String>, safety: SafetyBoundary) -> Self {
        Self {
            account_id: account_id.into(),
            enabled: false,
            mode: AutomationMode::Supervised,
            enabled_types: ActionType::all()
                .iter()
                .copied()
                .filter(|t| *t != ActionType::Rollback)
                .collect(),
            safety,
            blocked_reason: None,
            blocked_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Reason new admissions are refused, if any.
    pub fn block_reason(&self) -> Option<String> {
        if let Some(reason) = &self.blocked_reason {
            return Some(format!("automation stopped: {reason}"));
        }
        if self.mode == AutomationMode::Disabled {
            return Some("automation mode is disabled".to_string());
        }
        if !self.enabled {
            return Some("automation is not enabled".to_string());
        }
        None
    }

    pub fn apply(&mut self, patch: AutomationPatch) -> Result<()> {
        if let Some(enabled) = patch.enabled {
            if enabled && self.blocked_reason.is_some() {
                return Err(AdpilotError::InvalidInput(
                    "account is emergency-stopped; use resume to re-enable".to_string(),
                ));
            }
            self.enabled = enabled;
        }
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(types) = patch.enabled_types {
            self.enabled_types = types;
        }
        if let Some(safety) = patch.safety {
            safety.validate()?;
            self.safety = safety;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial update for [`AutomationConfig`]. Block state is changed only by
/// emergency stop and resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub mode: Option<AutomationMode>,
    #[serde(default)]
    pub enabled_types: Option<BTreeSet<ActionType>>,
    #[serde(default)]
    pub safety: Option<SafetyBoundary>,
}

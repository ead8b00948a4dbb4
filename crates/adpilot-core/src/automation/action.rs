//! Proposed changes fed to the governor by the recommendation source.

use serde::{Deserialize, Serialize};

use crate::types::ActionType;

// ---------------------------------------------------------------------------
// ActionChange
// ---------------------------------------------------------------------------

/// What an action changes. One payload shape per [`ActionType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionChange {
    BidAdjustment {
        current_bid: f64,
        proposed_bid: f64,
    },
    BudgetAdjustment {
        current_budget: f64,
        proposed_budget: f64,
    },
    /// Placement bid modifier, in percent.
    PlacementAdjustment {
        placement: String,
        current_percent: f64,
        proposed_percent: f64,
    },
    NegativeKeyword {
        keyword_text: String,
        match_type: String,
    },
    /// Bid multiplier for the given local hours (0..=23).
    Dayparting {
        hours: Vec<u8>,
        current_multiplier: f64,
        proposed_multiplier: f64,
    },
    /// Restore the `before` value of an applied change.
    Rollback {
        detail_id: String,
        original_type: ActionType,
        from: serde_json::Value,
        to: serde_json::Value,
    },
}

impl ActionChange {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionChange::BidAdjustment { .. } => ActionType::BidAdjustment,
            ActionChange::BudgetAdjustment { .. } => ActionType::BudgetAdjustment,
            ActionChange::PlacementAdjustment { .. } => ActionType::PlacementAdjustment,
            ActionChange::NegativeKeyword { .. } => ActionType::NegativeKeyword,
            ActionChange::Dayparting { .. } => ActionType::Dayparting,
            ActionChange::Rollback { .. } => ActionType::Rollback,
        }
    }

    /// Size of the change in percent, for the kinds a safety cap applies to.
    ///
    /// Bids and budgets are measured relative to the current value; a change
    /// away from zero counts as unbounded. Placement modifiers are measured in
    /// percentage points and dayparting by distance of the multiplier from
    /// the current one. Negative keywords and rollbacks are unmeasured.
    pub fn magnitude_percent(&self) -> Option<f64> {
        match self {
            ActionChange::BidAdjustment {
                current_bid,
                proposed_bid,
            } => Some(relative_change(*current_bid, *proposed_bid)),
            ActionChange::BudgetAdjustment {
                current_budget,
                proposed_budget,
            } => Some(relative_change(*current_budget, *proposed_budget)),
            ActionChange::PlacementAdjustment {
                current_percent,
                proposed_percent,
                ..
            } => Some((proposed_percent - current_percent).abs()),
            ActionChange::Dayparting {
                current_multiplier,
                proposed_multiplier,
                ..
            } => Some((proposed_multiplier - current_multiplier).abs() * 100.0),
            ActionChange::NegativeKeyword { .. } | ActionChange::Rollback { .. } => None,
        }
    }

    pub fn before(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            ActionChange::BidAdjustment { current_bid, .. } => json!(current_bid),
            ActionChange::BudgetAdjustment { current_budget, .. } => json!(current_budget),
            ActionChange::PlacementAdjustment {
                placement,
                current_percent,
                ..
            } => json!({ "placement": placement, "percent": current_percent }),
            ActionChange::NegativeKeyword { .. } => serde_json::Value::Null,
            ActionChange::Dayparting {
                hours,
                current_multiplier,
                ..
            } => json!({ "hours": hours, "multiplier": current_multiplier }),
            ActionChange::Rollback { from, .. } => from.clone(),
        }
    }

    pub fn after(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            ActionChange::BidAdjustment { proposed_bid, .. } => json!(proposed_bid),
            ActionChange::BudgetAdjustment {
                proposed_budget, ..
            } => json!(proposed_budget),
            ActionChange::PlacementAdjustment {
                placement,
                proposed_percent,
                ..
            } => json!({ "placement": placement, "percent": proposed_percent }),
            ActionChange::NegativeKeyword {
                keyword_text,
                match_type,
            } => json!({ "keyword_text": keyword_text, "match_type": match_type }),
            ActionChange::Dayparting {
                hours,
                proposed_multiplier,
                ..
            } => json!({ "hours": hours, "multiplier": proposed_multiplier }),
            ActionChange::Rollback { to, .. } => to.clone(),
        }
    }
}

fn relative_change(current: f64, proposed: f64) -> f64 {
    if current == 0.0 {
        if proposed == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        ((proposed - current) / current).abs() * 100.0
    }
}

// ---------------------------------------------------------------------------
// ProposedAction
// ---------------------------------------------------------------------------

/// One recommended change for a single entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Campaign, ad group or keyword id the change applies to.
    pub target_id: String,
    /// Recommendation confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(flatten)]
    pub change: ActionChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProposedAction {
    pub fn action_type(&self) -> ActionType {
        self.change.action_type()
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AdpilotError;

fn invalid(kind: &str, s: &str) -> AdpilotError {
    AdpilotError::InvalidInput(format!("unknown {kind} '{s}'"))
}

// ---------------------------------------------------------------------------
// SyncType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Campaigns,
    Keywords,
    Performance,
    All,
}

impl SyncType {
    /// The concrete entity types fetched for this sync type. `All` is the union.
    pub fn entities(self) -> &'static [SyncType] {
        match self {
            SyncType::Campaigns => &[SyncType::Campaigns],
            SyncType::Keywords => &[SyncType::Keywords],
            SyncType::Performance => &[SyncType::Performance],
            SyncType::All => &[SyncType::Campaigns, SyncType::Keywords, SyncType::Performance],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncType::Campaigns => "campaigns",
            SyncType::Keywords => "keywords",
            SyncType::Performance => "performance",
            SyncType::All => "all",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncType {
    type Err = AdpilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "campaigns" => Ok(SyncType::Campaigns),
            "keywords" => Ok(SyncType::Keywords),
            "performance" => Ok(SyncType::Performance),
            "all" => Ok(SyncType::All),
            _ => Err(invalid("sync type", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a sync job.
///
/// Transitions: `Pending → Running → Completed | Failed`, or `Pending → Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = AdpilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(invalid("job status", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Why a job or task failed. Only `Transient` failures are eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Fatal,
    Stalled,
}

// ---------------------------------------------------------------------------
// Frequency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = AdpilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Frequency::Hourly),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(invalid("frequency", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// InitPhase
// ---------------------------------------------------------------------------

/// Backfill phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    HotData,
    ColdData,
    StructureData,
}

impl InitPhase {
    pub fn all() -> &'static [InitPhase] {
        &[
            InitPhase::HotData,
            InitPhase::ColdData,
            InitPhase::StructureData,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InitPhase::HotData => "hot_data",
            InitPhase::ColdData => "cold_data",
            InitPhase::StructureData => "structure_data",
        }
    }
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InitPhase {
    type Err = AdpilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot_data" | "hot" => Ok(InitPhase::HotData),
            "cold_data" | "cold" => Ok(InitPhase::ColdData),
            "structure_data" | "structure" => Ok(InitPhase::StructureData),
            _ => Err(invalid("init phase", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// AutomationMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    FullAuto,
    Supervised,
    Approval,
    Disabled,
}

impl AutomationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AutomationMode::FullAuto => "full_auto",
            AutomationMode::Supervised => "supervised",
            AutomationMode::Approval => "approval",
            AutomationMode::Disabled => "disabled",
        }
    }
}

impl fmt::Display for AutomationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AutomationMode {
    type Err = AdpilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_auto" | "full-auto" => Ok(AutomationMode::FullAuto),
            "supervised" => Ok(AutomationMode::Supervised),
            "approval" => Ok(AutomationMode::Approval),
            "disabled" => Ok(AutomationMode::Disabled),
            _ => Err(invalid("automation mode", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

/// Tag of a proposed action. Each value has exactly one payload shape in
/// [`crate::automation::action::ActionChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    BidAdjustment,
    BudgetAdjustment,
    PlacementAdjustment,
    NegativeKeyword,
    Dayparting,
    Rollback,
}

impl ActionType {
    pub fn all() -> &'static [ActionType] {
        &[
            ActionType::BidAdjustment,
            ActionType::BudgetAdjustment,
            ActionType::PlacementAdjustment,
            ActionType::NegativeKeyword,
            ActionType::Dayparting,
            ActionType::Rollback,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::BidAdjustment => "bid_adjustment",
            ActionType::BudgetAdjustment => "budget_adjustment",
            ActionType::PlacementAdjustment => "placement_adjustment",
            ActionType::NegativeKeyword => "negative_keyword",
            ActionType::Dayparting => "dayparting",
            ActionType::Rollback => "rollback",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = AdpilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bid_adjustment" | "bid" => Ok(ActionType::BidAdjustment),
            "budget_adjustment" | "budget" => Ok(ActionType::BudgetAdjustment),
            "placement_adjustment" | "placement" => Ok(ActionType::PlacementAdjustment),
            "negative_keyword" => Ok(ActionType::NegativeKeyword),
            "dayparting" => Ok(ActionType::Dayparting),
            "rollback" => Ok(ActionType::Rollback),
            _ => Err(invalid("action type", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// DetailStatus
// ---------------------------------------------------------------------------

/// Outcome of one item in an execution batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailStatus {
    Applied,
    Skipped,
    Error,
    Blocked,
    PendingApproval,
}

impl DetailStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DetailStatus::Applied => "applied",
            DetailStatus::Skipped => "skipped",
            DetailStatus::Error => "error",
            DetailStatus::Blocked => "blocked",
            DetailStatus::PendingApproval => "pending_approval",
        }
    }
}

impl fmt::Display for DetailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_sync_type_is_union_of_entities() {
        assert_eq!(
            SyncType::All.entities(),
            &[SyncType::Campaigns, SyncType::Keywords, SyncType::Performance]
        );
        assert_eq!(SyncType::Keywords.entities(), &[SyncType::Keywords]);
    }

    #[test]
    fn terminal_job_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn string_forms_parse_back() {
        for t in ActionType::all() {
            assert_eq!(t.as_str().parse::<ActionType>().unwrap(), *t);
        }
        assert_eq!("full-auto".parse::<AutomationMode>().unwrap(), AutomationMode::FullAuto);
        assert_eq!("weekly".parse::<Frequency>().unwrap(), Frequency::Weekly);
        assert!("fortnightly".parse::<Frequency>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&InitPhase::ColdData).unwrap();
        assert_eq!(json, "\"cold_data\"");
        let json = serde_json::to_string(&DetailStatus::PendingApproval).unwrap();
        assert_eq!(json, "\"pending_approval\"");
    }
}

pub mod action;
pub mod config;
pub mod daily_stats;
pub mod governor;

pub use action::{ActionChange, ProposedAction};
pub use config::{AutomationConfig, AutomationPatch, SafetyBoundary};
pub use daily_stats::DailyExecutionStats;
pub use governor::{evaluate, ApprovalStatus, Decision, Governor, PendingApproval};

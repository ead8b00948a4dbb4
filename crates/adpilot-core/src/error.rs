use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdpilotError {
    #[error("not initialized: run 'adpilot init'")]
    NotInitialized,

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("initialization not started for account: {0}")]
    InitializationNotFound(String),

    #[error("execution detail not found: {0}")]
    DetailNotFound(String),

    #[error("approval not found: {0}")]
    ApprovalNotFound(String),

    #[error("initialization already exists for account '{0}'")]
    InitializationExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("rate limiter queue full ({depth} waiting); retry later")]
    Backpressure { depth: usize },

    #[error("automation stopped for account '{account_id}': {reason}")]
    AutomationStopped { account_id: String, reason: String },

    #[error("automation cycle already running for account '{0}'")]
    CycleInProgress(String),

    #[error("transient API failure: {0}")]
    TransientApi(String),

    #[error("fatal API failure: {0}")]
    FatalApi(String),

    #[error("unknown timezone or marketplace: {0}")]
    UnknownTimezone(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AdpilotError {
    /// True for failures the scheduler's bounded retry is allowed to re-attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdpilotError::TransientApi(_))
    }
}

pub type Result<T> = std::result::Result<T, AdpilotError>;

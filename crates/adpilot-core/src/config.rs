use crate::automation::config::SafetyBoundary;
use crate::error::{AdpilotError, Result};
use crate::paths;
use crate::types::SyncType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RateLimitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_second")]
    pub per_second: u32,
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
}

fn default_per_second() -> u32 {
    2
}

fn default_per_minute() -> u32 {
    60
}

fn default_per_hour() -> u32 {
    2000
}

fn default_max_queue_depth() -> usize {
    100
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
            max_queue_depth: default_max_queue_depth(),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Running jobs older than this are failed by the watchdog.
    #[serde(default = "default_max_job_duration")]
    pub max_job_duration_secs: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Attempts used by the tick when a due schedule fails transiently.
    #[serde(default = "default_schedule_attempts")]
    pub schedule_max_attempts: u32,
    #[serde(default = "default_schedule_backoff")]
    pub schedule_backoff_ms: u64,
}

fn default_page_size() -> u32 {
    100
}

fn default_max_job_duration() -> u64 {
    3600
}

fn default_tick_interval() -> u64 {
    60
}

fn default_schedule_attempts() -> u32 {
    3
}

fn default_schedule_backoff() -> u64 {
    1000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_job_duration_secs: default_max_job_duration(),
            tick_interval_secs: default_tick_interval(),
            schedule_max_attempts: default_schedule_attempts(),
            schedule_backoff_ms: default_schedule_backoff(),
        }
    }
}

// ---------------------------------------------------------------------------
// InitializationConfig
// ---------------------------------------------------------------------------

/// Shape of the historical backfill plan.
///
/// Days are counted back from the local date the plan is built on: the hot
/// window covers days `0..hot_days`, the cold window `cold_start_day..=cold_end_day`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializationConfig {
    #[serde(default = "default_hot_days")]
    pub hot_days: u32,
    #[serde(default = "default_hot_chunk")]
    pub hot_chunk_days: u32,
    #[serde(default = "default_hot_channels")]
    pub hot_channels: Vec<String>,
    #[serde(default = "default_cold_start")]
    pub cold_start_day: u32,
    #[serde(default = "default_cold_end")]
    pub cold_end_day: u32,
    #[serde(default = "default_cold_chunk")]
    pub cold_chunk_days: u32,
    #[serde(default = "default_cold_channels")]
    pub cold_channels: Vec<String>,
    #[serde(default = "default_true")]
    pub include_structure: bool,
    #[serde(default = "default_structure_types")]
    pub structure_types: Vec<SyncType>,
    #[serde(default = "default_task_attempts")]
    pub max_task_attempts: u32,
    #[serde(default = "default_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
}

fn default_hot_days() -> u32 {
    90
}

fn default_hot_chunk() -> u32 {
    9
}

fn default_hot_channels() -> Vec<String> {
    vec!["sp".to_string(), "sb".to_string(), "sd".to_string()]
}

fn default_cold_start() -> u32 {
    91
}

fn default_cold_end() -> u32 {
    365
}

fn default_cold_chunk() -> u32 {
    30
}

fn default_cold_channels() -> Vec<String> {
    vec!["sp".to_string(), "sb".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_structure_types() -> Vec<SyncType> {
    vec![SyncType::Campaigns, SyncType::Keywords]
}

fn default_task_attempts() -> u32 {
    3
}

fn default_concurrent_tasks() -> usize {
    2
}

impl Default for InitializationConfig {
    fn default() -> Self {
        Self {
            hot_days: default_hot_days(),
            hot_chunk_days: default_hot_chunk(),
            hot_channels: default_hot_channels(),
            cold_start_day: default_cold_start(),
            cold_end_day: default_cold_end(),
            cold_chunk_days: default_cold_chunk(),
            cold_channels: default_cold_channels(),
            include_structure: true,
            structure_types: default_structure_types(),
            max_task_attempts: default_task_attempts(),
            max_concurrent_tasks: default_concurrent_tasks(),
        }
    }
}

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://advertising-api.amazon.com".to_string()
}

fn default_token_env() -> String {
    "ADPILOT_API_TOKEN".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            timeout_secs: default_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// AccountConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace: Option<String>,
    /// IANA name; wins over the marketplace mapping when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub initialization: InitializationConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accounts: BTreeMap<String, AccountConfig>,
    #[serde(default = "default_marketplace")]
    pub default_marketplace: String,
    #[serde(default)]
    pub automation_defaults: SafetyBoundary,
}

fn default_version() -> u32 {
    1
}

fn default_marketplace() -> String {
    "US".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            rate_limits: RateLimitConfig::default(),
            sync: SyncConfig::default(),
            initialization: InitializationConfig::default(),
            api: ApiConfig::default(),
            accounts: BTreeMap::new(),
            default_marketplace: default_marketplace(),
            automation_defaults: SafetyBoundary::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(AdpilotError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn account(&self, account_id: &str) -> AccountConfig {
        self.accounts.get(account_id).cloned().unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        let rl = &self.rate_limits;
        if rl.per_second == 0 || rl.per_minute == 0 || rl.per_hour == 0 {
            error("rate_limits: every window limit must be at least 1".to_string());
        }
        if rl.per_second > rl.per_minute || rl.per_minute > rl.per_hour {
            error(format!(
                "rate_limits: expected per_second <= per_minute <= per_hour, got {}/{}/{}",
                rl.per_second, rl.per_minute, rl.per_hour
            ));
        }

        let init = &self.initialization;
        if init.hot_chunk_days == 0 || init.cold_chunk_days == 0 {
            error("initialization: chunk sizes must be at least 1 day".to_string());
        }
        if init.cold_start_day > init.cold_end_day {
            error(format!(
                "initialization: cold window {}..={} is empty",
                init.cold_start_day, init.cold_end_day
            ));
        }
        if init.hot_channels.is_empty() || init.cold_channels.is_empty() {
            error("initialization: hot and cold channel lists must not be empty".to_string());
        }
        if init.max_task_attempts == 0 {
            error("initialization: max_task_attempts must be at least 1".to_string());
        }
        if init.max_concurrent_tasks == 0 {
            error("initialization: max_concurrent_tasks must be at least 1".to_string());
        }

        if let Err(e) = self.automation_defaults.validate() {
            error(format!("automation_defaults: {e}"));
        }

        if crate::tz::marketplace_tz(&self.default_marketplace).is_none() {
            error(format!(
                "unknown default_marketplace '{}'",
                self.default_marketplace
            ));
        }

        for (account, acfg) in &self.accounts {
            if let Some(mp) = &acfg.marketplace {
                if crate::tz::marketplace_tz(mp).is_none() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!("account '{account}': unknown marketplace '{mp}'"),
                    });
                }
            }
            if let Some(tz) = &acfg.timezone {
                if tz.parse::<chrono_tz::Tz>().is_err() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!("account '{account}': unknown timezone '{tz}'"),
                    });
                }
            }
        }

        if self.sync.max_job_duration_secs < 60 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "sync.max_job_duration_secs={} will fail most jobs as stalled",
                    self.sync.max_job_duration_secs
                ),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

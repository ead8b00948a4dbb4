use super::{block_on, open_engine};
use crate::output::{fmt_time, or_dash, print_json, print_table};
use adpilot_core::retry::RetryPolicy;
use adpilot_core::schedule::{NewSchedule, ScheduleExecution, SchedulePatch, SyncSchedule};
use adpilot_core::types::{Frequency, SyncType};
use chrono::{NaiveTime, Weekday};
use clap::Subcommand;
use std::path::Path;
use std::time::Duration;

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| format!("expected HH:MM, got '{s}'"))
}

#[derive(Subcommand)]
pub enum ScheduleSubcommand {
    /// Create a recurring sync schedule
    Create {
        account_id: String,
        #[arg(long = "type", default_value = "all")]
        sync_type: SyncType,
        /// hourly, daily, weekly or monthly
        #[arg(long)]
        frequency: Frequency,
        /// Local time of day (HH:MM) in the account's timezone
        #[arg(long, value_parser = parse_time)]
        at: Option<NaiveTime>,
        /// Required for weekly schedules (mon, tue, ...)
        #[arg(long)]
        day_of_week: Option<Weekday>,
        /// Required for monthly schedules; clamped to the month's last day
        #[arg(long)]
        day_of_month: Option<u32>,
        #[arg(long)]
        disabled: bool,
    },
    /// Change fields of a schedule; the next run is recomputed
    Update {
        id: String,
        #[arg(long = "type")]
        sync_type: Option<SyncType>,
        #[arg(long)]
        frequency: Option<Frequency>,
        #[arg(long, value_parser = parse_time)]
        at: Option<NaiveTime>,
        #[arg(long)]
        day_of_week: Option<Weekday>,
        #[arg(long)]
        day_of_month: Option<u32>,
        #[arg(long)]
        enabled: Option<bool>,
    },
    /// Delete a schedule and its execution history
    Delete { id: String },
    /// Show one schedule
    Get { id: String },
    /// List schedules
    List {
        #[arg(long)]
        account: Option<String>,
    },
    /// Run a schedule now
    Trigger {
        id: String,
        /// Retry transient failures using the configured policy
        #[arg(long)]
        retry: bool,
        /// Override the attempt count (implies --retry)
        #[arg(long)]
        attempts: Option<u32>,
        /// Initial backoff in milliseconds (with --attempts)
        #[arg(long, default_value = "1000")]
        backoff_ms: u64,
    },
    /// Execution history, newest first
    History {
        id: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Aggregate execution stats
    Stats { id: String },
}

pub fn run(root: &Path, subcmd: ScheduleSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    match subcmd {
        ScheduleSubcommand::Create {
            account_id,
            sync_type,
            frequency,
            at,
            day_of_week,
            day_of_month,
            disabled,
        } => {
            let s = engine.create_schedule(NewSchedule {
                account_id,
                sync_type,
                frequency,
                time_of_day: at,
                day_of_week,
                day_of_month,
                enabled: Some(!disabled),
            })?;
            show(&s, json)
        }
        ScheduleSubcommand::Update {
            id,
            sync_type,
            frequency,
            at,
            day_of_week,
            day_of_month,
            enabled,
        } => {
            let s = engine.update_schedule(
                &id,
                SchedulePatch {
                    sync_type,
                    frequency,
                    time_of_day: at,
                    day_of_week,
                    day_of_month,
                    enabled,
                },
            )?;
            show(&s, json)
        }
        ScheduleSubcommand::Delete { id } => {
            engine.delete_schedule(&id)?;
            if json {
                print_json(&serde_json::json!({ "deleted": id }))
            } else {
                println!("Deleted schedule {id}.");
                Ok(())
            }
        }
        ScheduleSubcommand::Get { id } => show(&engine.schedule(&id)?, json),
        ScheduleSubcommand::List { account } => {
            let schedules = engine.schedules(account.as_deref())?;
            if json {
                return print_json(&schedules);
            }
            if schedules.is_empty() {
                println!("No schedules.");
                return Ok(());
            }
            let rows = schedules
                .iter()
                .map(|s| {
                    vec![
                        s.id.clone(),
                        s.account_id.clone(),
                        s.sync_type.to_string(),
                        s.frequency.to_string(),
                        if s.enabled { "yes" } else { "no" }.to_string(),
                        fmt_time(s.last_run_at),
                        fmt_time(s.next_run_at),
                    ]
                })
                .collect();
            print_table(
                &["ID", "ACCOUNT", "TYPE", "FREQUENCY", "ENABLED", "LAST RUN", "NEXT RUN"],
                rows,
            );
            Ok(())
        }
        ScheduleSubcommand::Trigger {
            id,
            retry,
            attempts,
            backoff_ms,
        } => {
            let exec = match (retry, attempts) {
                (_, Some(n)) => {
                    let policy = RetryPolicy::new(n, Duration::from_millis(backoff_ms));
                    block_on(engine.trigger_schedule_with_retry(&id, Some(policy)))??
                }
                (true, None) => block_on(engine.trigger_schedule_with_retry(&id, None))??,
                (false, None) => block_on(engine.trigger_schedule(&id))??,
            };
            show_execution(&exec, json)?;
            if exec.status != adpilot_core::types::JobStatus::Completed {
                anyhow::bail!("scheduled sync did not complete");
            }
            Ok(())
        }
        ScheduleSubcommand::History { id, limit } => {
            let history = engine.schedule_history(&id, Some(limit))?;
            if json {
                return print_json(&history);
            }
            if history.is_empty() {
                println!("No executions.");
                return Ok(());
            }
            let rows = history
                .iter()
                .map(|e| {
                    vec![
                        fmt_time(Some(e.started_at)),
                        e.status.to_string(),
                        e.retry_count.to_string(),
                        e.records_synced.to_string(),
                        e.error_message.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(&["STARTED", "STATUS", "RETRIES", "RECORDS", "ERROR"], rows);
            Ok(())
        }
        ScheduleSubcommand::Stats { id } => {
            let stats = engine.schedule_stats(&id)?;
            if json {
                return print_json(&stats);
            }
            println!("Executions:    {}", stats.total_executions);
            println!("Succeeded:     {}", stats.succeeded);
            println!("Failed:        {}", stats.failed);
            println!("Success rate:  {:.1}%", stats.success_rate);
            if let Some(d) = stats.average_duration_secs {
                println!("Avg duration:  {d:.1}s");
            }
            if let Some(r) = stats.average_records {
                println!("Avg records:   {r:.1}");
            }
            println!("Retries:       {}", stats.total_retries);
            println!("Last run:      {}", fmt_time(stats.last_run_at));
            Ok(())
        }
    }
}

fn show(s: &SyncSchedule, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(s);
    }
    println!("Schedule:  {}", s.id);
    println!("Account:   {}", s.account_id);
    println!("Type:      {}", s.sync_type);
    println!("Frequency: {} at {} ({})", s.frequency, s.time_of_day.format("%H:%M"), s.timezone);
    println!("Enabled:   {}", s.enabled);
    println!("Last run:  {}", fmt_time(s.last_run_at));
    println!("Next run:  {}", fmt_time(s.next_run_at));
    Ok(())
}

fn show_execution(e: &ScheduleExecution, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(e);
    }
    println!("Execution: {}", e.id);
    println!("Job:       {}", or_dash(e.job_id.as_deref()));
    println!("Status:    {}", e.status);
    println!("Retries:   {}", e.retry_count);
    println!("Records:   {}", e.records_synced);
    if let Some(err) = &e.error_message {
        println!("Error:     {err}");
    }
    Ok(())
}

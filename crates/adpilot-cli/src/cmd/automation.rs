use super::{block_on, open_engine};
use crate::output::{fmt_time, or_dash, print_json, print_table};
use adpilot_core::automation::{AutomationConfig, AutomationPatch, ProposedAction};
use adpilot_core::ledger::{BatchRecord, ExecutionDetail};
use adpilot_core::types::{ActionType, AutomationMode};
use anyhow::Context;
use chrono::NaiveDate;
use clap::Subcommand;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum AutomationSubcommand {
    /// Show an account's automation config
    Show { account_id: String },
    /// Change automation settings
    Set {
        account_id: String,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// full_auto, supervised, approval or disabled
        #[arg(long)]
        mode: Option<AutomationMode>,
        /// Comma-separated action types allowed to run
        #[arg(long, value_delimiter = ',')]
        types: Option<Vec<ActionType>>,
        #[arg(long)]
        max_bid_change: Option<f64>,
        #[arg(long)]
        max_budget_change: Option<f64>,
        #[arg(long)]
        auto_confidence: Option<f64>,
        #[arg(long)]
        supervised_confidence: Option<f64>,
        #[arg(long)]
        daily_bids: Option<u32>,
        #[arg(long)]
        daily_budgets: Option<u32>,
        #[arg(long)]
        daily_total: Option<u32>,
    },
    /// Evaluate and execute proposed actions (JSON array from a file or stdin)
    Cycle {
        account_id: String,
        /// Read proposals from this file; defaults to stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Block all automated execution for an account
    Stop { account_id: String, reason: String },
    /// Clear an emergency stop
    Resume { account_id: String },
    /// Today's counters, or a given local date
    Stats {
        account_id: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Show the most recent days instead of one
        #[arg(long)]
        days: Option<usize>,
    },
    /// Execution batches, newest first
    History {
        account_id: String,
        #[arg(long, default_value = "10")]
        limit: usize,
        /// Include per-action details
        #[arg(long)]
        details: bool,
    },
    /// Show one execution detail
    Detail { detail_id: String },
    /// List actions waiting for approval
    Approvals {
        #[arg(long)]
        account: Option<String>,
    },
    /// Execute a held action
    Approve { approval_id: String },
    /// Discard a held action
    Reject { approval_id: String },
    /// Restore the previous value of an applied action
    Rollback { detail_id: String },
}

pub fn run(root: &Path, subcmd: AutomationSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    match subcmd {
        AutomationSubcommand::Show { account_id } => show_config(&engine.automation_config(&account_id)?, json),
        AutomationSubcommand::Set {
            account_id,
            enable,
            disable,
            mode,
            types,
            max_bid_change,
            max_budget_change,
            auto_confidence,
            supervised_confidence,
            daily_bids,
            daily_budgets,
            daily_total,
        } => {
            let mut safety = engine.automation_config(&account_id)?.safety;
            let mut safety_changed = false;
            let mut set = |field: &mut f64, v: Option<f64>| {
                if let Some(v) = v {
                    *field = v;
                    safety_changed = true;
                }
            };
            set(&mut safety.max_bid_change_percent, max_bid_change);
            set(&mut safety.max_budget_change_percent, max_budget_change);
            set(&mut safety.auto_execute_confidence, auto_confidence);
            set(&mut safety.supervised_confidence, supervised_confidence);
            for (field, v) in [
                (&mut safety.max_daily_bid_adjustments, daily_bids),
                (&mut safety.max_daily_budget_adjustments, daily_budgets),
                (&mut safety.max_daily_total_adjustments, daily_total),
            ] {
                if let Some(v) = v {
                    *field = v;
                    safety_changed = true;
                }
            }

            let patch = AutomationPatch {
                enabled: match (enable, disable) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                mode,
                enabled_types: types.map(|t| t.into_iter().collect::<BTreeSet<_>>()),
                safety: safety_changed.then_some(safety),
            };
            let cfg = engine.update_automation_config(&account_id, patch)?;
            show_config(&cfg, json)
        }
        AutomationSubcommand::Cycle { account_id, file } => {
            let raw = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("failed to read proposals from stdin")?;
                    buf
                }
            };
            let actions: Vec<ProposedAction> =
                serde_json::from_str(&raw).context("proposals must be a JSON array of actions")?;
            let record = block_on(engine.run_full_cycle(&account_id, actions))??;
            show_batch(&record, true, json)
        }
        AutomationSubcommand::Stop { account_id, reason } => {
            let cfg = engine.emergency_stop(&account_id, &reason)?;
            if json {
                return print_json(&cfg);
            }
            println!("Automation stopped for {account_id}: {reason}");
            Ok(())
        }
        AutomationSubcommand::Resume { account_id } => {
            let cfg = engine.resume(&account_id)?;
            if json {
                return print_json(&cfg);
            }
            println!("Automation resumed for {account_id}.");
            Ok(())
        }
        AutomationSubcommand::Stats {
            account_id,
            date,
            days,
        } => {
            let stats = match days {
                Some(n) => engine.recent_daily_stats(&account_id, n)?,
                None => vec![engine.daily_stats(&account_id, date)?],
            };
            if json {
                return match days {
                    Some(_) => print_json(&stats),
                    None => print_json(&stats[0]),
                };
            }
            let rows = stats
                .iter()
                .map(|s| {
                    vec![
                        s.date.to_string(),
                        s.bid_adjustments.to_string(),
                        s.budget_adjustments.to_string(),
                        s.placement_adjustments.to_string(),
                        s.negative_keywords.to_string(),
                        s.dayparting_adjustments.to_string(),
                        s.rollbacks.to_string(),
                        s.total_adjustments.to_string(),
                        s.blocked.to_string(),
                        s.skipped.to_string(),
                        s.pending_approval.to_string(),
                        s.errors.to_string(),
                    ]
                })
                .collect();
            print_table(
                &[
                    "DATE", "BIDS", "BUDGETS", "PLACEMENTS", "NEGATIVES", "DAYPARTING", "ROLLBACKS",
                    "TOTAL", "BLOCKED", "SKIPPED", "PENDING", "ERRORS",
                ],
                rows,
            );
            Ok(())
        }
        AutomationSubcommand::History {
            account_id,
            limit,
            details,
        } => {
            let history = engine.execution_history(&account_id, Some(limit))?;
            if json {
                return print_json(&history);
            }
            if history.is_empty() {
                println!("No executions.");
                return Ok(());
            }
            for record in &history {
                show_batch(record, details, false)?;
                println!();
            }
            Ok(())
        }
        AutomationSubcommand::Detail { detail_id } => {
            let detail = engine.execution_detail(&detail_id)?;
            if json {
                return print_json(&detail);
            }
            println!("Detail:     {}", detail.id);
            println!("Batch:      {}", detail.batch_id);
            println!("Target:     {}", detail.target_id);
            println!("Action:     {}", detail.action_type);
            println!("Status:     {}", detail.status);
            println!("Confidence: {:.2}", detail.confidence);
            println!("Before:     {}", detail.before);
            println!("After:      {}", detail.after);
            println!("Reason:     {}", or_dash(detail.reason.as_deref()));
            println!("At:         {}", fmt_time(Some(detail.created_at)));
            Ok(())
        }
        AutomationSubcommand::Approvals { account } => {
            let pending = engine.pending_approvals(account.as_deref())?;
            if json {
                return print_json(&pending);
            }
            if pending.is_empty() {
                println!("No pending approvals.");
                return Ok(());
            }
            let rows = pending
                .iter()
                .map(|a| {
                    vec![
                        a.id.clone(),
                        a.account_id.clone(),
                        a.action.action_type().to_string(),
                        a.action.target_id.clone(),
                        format!("{:.2}", a.action.confidence),
                        fmt_time(Some(a.created_at)),
                    ]
                })
                .collect();
            print_table(&["ID", "ACCOUNT", "ACTION", "TARGET", "CONFIDENCE", "CREATED"], rows);
            Ok(())
        }
        AutomationSubcommand::Approve { approval_id } => {
            let record = block_on(engine.approve(&approval_id))??;
            show_batch(&record, true, json)
        }
        AutomationSubcommand::Reject { approval_id } => {
            let approval = engine.reject(&approval_id)?;
            if json {
                return print_json(&approval);
            }
            println!("Rejected {}.", approval.id);
            Ok(())
        }
        AutomationSubcommand::Rollback { detail_id } => {
            let record = block_on(engine.rollback(&detail_id))??;
            show_batch(&record, true, json)
        }
    }
}

fn show_config(cfg: &AutomationConfig, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(cfg);
    }
    let s = &cfg.safety;
    println!("Account:      {}", cfg.account_id);
    println!("Enabled:      {}", cfg.enabled);
    println!("Mode:         {}", cfg.mode);
    println!(
        "Types:        {}",
        cfg.enabled_types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
    );
    if let Some(reason) = &cfg.blocked_reason {
        println!("STOPPED:      {reason} (since {})", fmt_time(cfg.blocked_at));
    }
    println!("Max change:   bid {}% / budget {}%", s.max_bid_change_percent, s.max_budget_change_percent);
    println!("Confidence:   auto >= {} / supervised >= {}", s.auto_execute_confidence, s.supervised_confidence);
    println!(
        "Daily caps:   bids {} / budgets {} / total {}",
        s.max_daily_bid_adjustments, s.max_daily_budget_adjustments, s.max_daily_total_adjustments
    );
    Ok(())
}

fn show_batch(record: &BatchRecord, with_details: bool, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(record);
    }
    let b = &record.batch;
    println!(
        "Batch {} ({}): {} item(s), {} applied, {} skipped, {} blocked, {} pending, {} failed",
        b.batch_id,
        fmt_time(Some(b.created_at)),
        b.total_items,
        b.success_items,
        b.skipped_items,
        b.blocked_items,
        b.pending_items,
        b.failed_items
    );
    if with_details && !record.details.is_empty() {
        print_table(&["DETAIL", "ACTION", "TARGET", "STATUS", "REASON"], detail_rows(&record.details));
    }
    Ok(())
}

fn detail_rows(details: &[ExecutionDetail]) -> Vec<Vec<String>> {
    details
        .iter()
        .map(|d| {
            vec![
                d.id.clone(),
                d.action_type.to_string(),
                d.target_id.clone(),
                d.status.to_string(),
                or_dash(d.reason.as_deref()),
            ]
        })
        .collect()
}

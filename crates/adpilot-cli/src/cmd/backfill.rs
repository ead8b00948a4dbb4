use super::{block_on, open_engine};
use crate::output::{or_dash, print_json, print_table};
use adpilot_core::initialization::{InitializationProgress, TaskStatus};
use adpilot_core::types::InitPhase;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum BackfillSubcommand {
    /// Plan and run the historical backfill for an account
    Start {
        account_id: String,
        /// Replace an existing plan
        #[arg(long)]
        force: bool,
        /// Write the plan without running it
        #[arg(long)]
        plan_only: bool,
    },
    /// Run the remaining tasks of a planned backfill
    Resume { account_id: String },
    /// Requeue failed tasks and run them again
    Retry {
        account_id: String,
        /// Only requeue; leave running to `resume` or the daemon
        #[arg(long)]
        requeue_only: bool,
    },
    /// Per-phase progress and estimated time remaining
    Progress { account_id: String },
    /// List backfill tasks
    Tasks {
        account_id: String,
        #[arg(long)]
        phase: Option<InitPhase>,
        /// Only failed tasks
        #[arg(long)]
        failed: bool,
    },
}

pub fn run(root: &Path, subcmd: BackfillSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    match subcmd {
        BackfillSubcommand::Start {
            account_id,
            force,
            plan_only,
        } => {
            let progress = if plan_only {
                engine.plan_initialization(&account_id, force)?
            } else {
                block_on(engine.start_initialization(&account_id, force))??
            };
            show(&progress, json)
        }
        BackfillSubcommand::Resume { account_id } => {
            let progress = block_on(engine.run_initialization(&account_id))??;
            show(&progress, json)
        }
        BackfillSubcommand::Retry {
            account_id,
            requeue_only,
        } => {
            if requeue_only {
                let n = engine.requeue_failed_initialization(&account_id)?;
                if json {
                    return print_json(&serde_json::json!({ "requeued": n }));
                }
                println!("Requeued {n} failed task(s).");
                return Ok(());
            }
            let progress = block_on(engine.retry_failed_initialization(&account_id))??;
            show(&progress, json)
        }
        BackfillSubcommand::Progress { account_id } => {
            show(&engine.initialization_progress(&account_id)?, json)
        }
        BackfillSubcommand::Tasks {
            account_id,
            phase,
            failed,
        } => {
            let tasks: Vec<_> = engine
                .initialization_tasks(&account_id)?
                .into_iter()
                .filter(|t| phase.map_or(true, |p| t.phase == p))
                .filter(|t| !failed || t.status == TaskStatus::Failed)
                .collect();
            if json {
                return print_json(&tasks);
            }
            if tasks.is_empty() {
                println!("No tasks.");
                return Ok(());
            }
            let rows = tasks
                .iter()
                .map(|t| {
                    vec![
                        t.id.clone(),
                        t.phase.to_string(),
                        t.sync_type.to_string(),
                        or_dash(t.channel.as_deref()),
                        t.window.map(|w| w.to_string()).unwrap_or_else(|| "-".to_string()),
                        t.status.to_string(),
                        t.attempts.to_string(),
                        or_dash(t.last_error.as_deref()),
                    ]
                })
                .collect();
            print_table(
                &["ID", "PHASE", "TYPE", "CHANNEL", "WINDOW", "STATUS", "ATTEMPTS", "ERROR"],
                rows,
            );
            Ok(())
        }
    }
}

fn show(p: &InitializationProgress, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(p);
    }
    println!("Account:   {}", p.account_id);
    println!("Mode:      {}", p.mode);
    println!("Status:    {}", p.status);
    println!("Progress:  {:.1}%", p.overall_progress);
    if let Some(eta) = p.estimated_time_remaining_secs {
        println!("Remaining: ~{eta}s");
    }
    println!();
    let rows = p
        .phases
        .iter()
        .map(|ph| {
            vec![
                ph.phase.to_string(),
                format!("{}/{}", ph.completed_tasks, ph.total_tasks),
                ph.failed_tasks.to_string(),
                format!("{:.1}%", ph.progress_percent),
            ]
        })
        .collect();
    print_table(&["PHASE", "DONE", "FAILED", "PROGRESS"], rows);
    Ok(())
}

use super::{block_on, open_engine};
use crate::output::{fmt_time, or_dash, print_json, print_table};
use adpilot_core::sync_job::{JobFilter, SyncJob};
use adpilot_core::types::{JobStatus, SyncType};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum JobSubcommand {
    /// Create a pending manual sync job
    Create {
        account_id: String,
        /// campaigns, keywords, performance or all
        #[arg(long = "type", default_value = "all")]
        sync_type: SyncType,
        /// Run it now instead of leaving it for the daemon
        #[arg(long)]
        run: bool,
    },
    /// Run a pending job to completion
    Run { job_id: String },
    /// Cancel a pending job
    Cancel { job_id: String },
    /// Show one job
    Get { job_id: String },
    /// List jobs, newest first
    List {
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long = "type")]
        sync_type: Option<SyncType>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

pub fn run(root: &Path, subcmd: JobSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    match subcmd {
        JobSubcommand::Create {
            account_id,
            sync_type,
            run,
        } => {
            let mut job = engine.create_job(&account_id, sync_type)?;
            if run {
                job = block_on(engine.run_job(&job.id))??;
            }
            show(&job, json)
        }
        JobSubcommand::Run { job_id } => {
            let job = block_on(engine.run_job(&job_id))??;
            show(&job, json)
        }
        JobSubcommand::Cancel { job_id } => {
            let job = engine.cancel_job(&job_id)?;
            if json {
                print_json(&job)
            } else {
                println!("Cancelled job {}.", job.id);
                Ok(())
            }
        }
        JobSubcommand::Get { job_id } => show(&engine.job(&job_id)?, json),
        JobSubcommand::List {
            account,
            status,
            sync_type,
            limit,
        } => {
            let jobs = engine.jobs(&JobFilter {
                account_id: account,
                status,
                sync_type,
                limit: Some(limit),
            })?;
            if json {
                return print_json(&jobs);
            }
            if jobs.is_empty() {
                println!("No jobs.");
                return Ok(());
            }
            let rows = jobs
                .iter()
                .map(|j| {
                    vec![
                        j.id.clone(),
                        j.account_id.clone(),
                        j.sync_type.to_string(),
                        j.status.to_string(),
                        j.records_synced.to_string(),
                        fmt_time(Some(j.created_at)),
                    ]
                })
                .collect();
            print_table(&["ID", "ACCOUNT", "TYPE", "STATUS", "RECORDS", "CREATED"], rows);
            Ok(())
        }
    }
}

fn show(job: &SyncJob, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(job);
    }
    println!("Job:      {}", job.id);
    println!("Account:  {}", job.account_id);
    println!("Type:     {}", job.sync_type);
    println!("Status:   {}", job.status);
    println!("Records:  {}", job.records_synced);
    println!("Started:  {}", fmt_time(job.started_at));
    println!("Finished: {}", fmt_time(job.completed_at));
    if let Some(d) = job.duration(chrono::Utc::now()) {
        println!("Duration: {}s", d.num_seconds());
    }
    if job.error_message.is_some() {
        println!("Error:    {}", or_dash(job.error_message.as_deref()));
    }
    Ok(())
}

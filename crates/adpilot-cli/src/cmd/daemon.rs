use super::{block_on, open_engine};
use crate::output::print_json;
use chrono::Utc;
use std::path::Path;

pub fn run(root: &Path, once: bool, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;

    if once {
        let report = block_on(engine.tick(Utc::now()))??;
        if json {
            return print_json(&report);
        }
        println!(
            "Triggered {} schedule(s) ({} failed), ran {} pending job(s).",
            report.schedules_triggered, report.schedules_failed, report.jobs_run
        );
        if report.stalled_jobs + report.stalled_tasks > 0 {
            println!(
                "Marked {} stalled job(s) and {} stalled backfill task(s) failed.",
                report.stalled_jobs, report.stalled_tasks
            );
        }
        return Ok(());
    }

    println!(
        "adpilot daemon ticking every {}s (Ctrl-C to stop)",
        engine.config().sync.tick_interval_secs
    );
    block_on(engine.run_loop(async {
        let _ = tokio::signal::ctrl_c().await;
    }))?;
    Ok(())
}

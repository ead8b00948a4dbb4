use super::open_engine;
use crate::output::{print_json, print_table};
use std::path::Path;

/// The budget of this process's limiter. A running daemon keeps its own
/// counters; query its server for live numbers.
pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let status = open_engine(root)?.rate_limit_status();
    if json {
        return print_json(&status);
    }
    let rows = status
        .windows
        .iter()
        .map(|w| {
            vec![
                w.window.as_str().to_string(),
                w.used.to_string(),
                w.limit.to_string(),
                w.reset_at.format("%H:%M:%S UTC").to_string(),
            ]
        })
        .collect();
    print_table(&["WINDOW", "USED", "LIMIT", "RESETS"], rows);
    println!(
        "\nQueue: {}/{}",
        status.queue_depth, status.max_queue_depth
    );
    Ok(())
}

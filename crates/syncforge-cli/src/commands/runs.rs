use std::path::Path;

use anyhow::Result;
use syncforge_types::state::{MappingId, RunId};

use super::list::format_time;
use super::open_engine;

/// Execute the `runs` command: recent run log entries, or the failed
/// records of one run.
pub fn execute(
    config_path: &Path,
    mapping_id: Option<i64>,
    limit: usize,
    failed_for: Option<i64>,
) -> Result<()> {
    let engine = open_engine(config_path)?;

    if let Some(run_id) = failed_for {
        let run_id = RunId::new(run_id);
        let Some(run) = engine.run(run_id)? else {
            anyhow::bail!("Run {run_id} not found");
        };
        let failed = engine.failed_records(run_id)?;
        println!(
            "Run {} ({}, attempt {}): {} failed record(s)",
            run.id.get(),
            run.status.as_str(),
            run.attempt,
            failed.len()
        );
        for record in &failed {
            println!(
                "  [{}] {}: {}",
                record.error_category,
                record.record_key.as_deref().unwrap_or("<no key>"),
                record.error_message
            );
        }
        return Ok(());
    }

    let runs = engine.runs(mapping_id.map(MappingId::new), limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    println!(
        "{:>6}  {:>7}  {:<11} {:<9} {:>3}  {:<20} {:>9} {:>7} {:>7} {:>6}",
        "RUN", "MAPPING", "MODE", "STATUS", "TRY", "STARTED", "PROCESSED", "CREATED", "UPDATED", "FAILED"
    );
    for run in &runs {
        println!(
            "{:>6}  {:>7}  {:<11} {:<9} {:>3}  {:<20} {:>9} {:>7} {:>7} {:>6}",
            run.id.get(),
            run.mapping_id.get(),
            run.mode.as_str(),
            run.status.as_str(),
            run.attempt,
            format_time(Some(run.started_at)),
            run.stats.records_processed,
            run.stats.records_created,
            run.stats.records_updated,
            run.stats.records_failed,
        );
        if let Some(message) = &run.stats.error_message {
            println!("        {message}");
        }
    }
    Ok(())
}

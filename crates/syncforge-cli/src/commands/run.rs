use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use syncforge_engine::extract::Query;
use syncforge_engine::result::MappingOutcome;
use syncforge_engine::run_all;
use syncforge_types::state::{RunMode, RunStatus};

use super::{open_engine, SelectorArgs};

/// Errors printed per mapping before the rest are summarised as a count.
const MAX_PRINTED_ERRORS: usize = 5;

/// Execute the `run` command: open the engine, fan out the selected
/// mappings, and print a summary per mapping.
pub async fn execute(
    config_path: &Path,
    selector: &SelectorArgs,
    full: bool,
    batch_size: Option<usize>,
    filters: Option<&str>,
) -> Result<()> {
    let engine = open_engine(config_path)?;

    let mode = if full { RunMode::Full } else { RunMode::Incremental };
    let mut request = engine.request(mode);
    if let Some(batch_size) = batch_size {
        anyhow::ensure!(batch_size > 0, "--batch-size must be at least 1");
        request.batch_size = batch_size;
    }
    if let Some(filters) = filters {
        request = request.with_filters(Query::from_json_str(filters).context("Invalid --filters")?);
    }

    let selector = selector.selector();
    let outcomes = run_all(Arc::new(engine), &selector, &request).await;
    if outcomes.is_empty() {
        anyhow::bail!("No active mappings matched {selector:?}");
    }

    for outcome in &outcomes {
        print_outcome(outcome);
    }

    let failed = outcomes
        .iter()
        .filter(|o| o.status() == RunStatus::Failed)
        .count();
    let json = serde_json::json!({
        "mode": mode.as_str(),
        "mappings": outcomes.len(),
        "failed": failed,
        "runs": outcomes.iter().map(outcome_json).collect::<Vec<_>>(),
    });
    println!("@@SYNC_JSON@@{json}");

    if failed > 0 {
        anyhow::bail!("{failed} of {} mapping(s) failed", outcomes.len());
    }
    Ok(())
}

fn print_outcome(outcome: &MappingOutcome) {
    println!(
        "Mapping '{}' (id {}): {}",
        outcome.entity_type,
        outcome.mapping_id,
        outcome.status()
    );
    let Some(result) = outcome.last() else {
        if let Some(message) = outcome.error_message() {
            println!("  Error:           {message}");
        }
        return;
    };
    let stats = result.stats();
    println!("  Run id:          {}", result.run.id);
    println!("  Processed:       {}", stats.records_processed);
    println!("  Created:         {}", stats.records_created);
    println!("  Updated:         {}", stats.records_updated);
    println!("  Unchanged:       {}", stats.records_unchanged);
    println!("  Failed:          {}", stats.records_failed);
    if stats.records_skipped > 0 {
        println!("  Skipped:         {}", stats.records_skipped);
    }
    println!("  Duration:        {:.2}s", result.duration.as_secs_f64());
    println!(
        "    Extract:       {:.3}s ({} pages)",
        result.timing.extract_secs, result.timing.pages
    );
    println!("    Transform:     {:.3}s", result.timing.transform_secs);
    println!(
        "    Load:          {:.3}s ({} batches)",
        result.timing.load_secs, result.timing.batches
    );
    if outcome.retry_count() > 0 {
        println!("  Retries:         {}", outcome.retry_count());
    }
    if let Some(message) = &stats.error_message {
        println!("  Error:           {message}");
    }
    for error in stats.errors.iter().take(MAX_PRINTED_ERRORS) {
        println!("    - {error}");
    }
    let hidden = stats.records_failed.saturating_sub(MAX_PRINTED_ERRORS as u64);
    if hidden > 0 {
        println!("    ... and {hidden} more (see `syncforge runs --failed {}`)", result.run.id);
    }
}

fn outcome_json(outcome: &MappingOutcome) -> serde_json::Value {
    let last = outcome.last();
    serde_json::json!({
        "mapping_id": outcome.mapping_id.get(),
        "entity_type": outcome.entity_type,
        "status": outcome.status().as_str(),
        "run_id": last.map(|r| r.run.id.get()),
        "attempts": outcome.attempts.len(),
        "stats": last.map(|r| r.stats()),
        "duration_secs": last.map(|r| r.duration.as_secs_f64()),
        "error": outcome.error_message(),
    })
}

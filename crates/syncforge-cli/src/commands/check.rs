use std::path::Path;

use anyhow::Result;

use super::{open_engine, SelectorArgs};

/// Execute the `check` command: validate configuration, then probe each
/// selected source and build each pipeline without running it.
pub async fn execute(config_path: &Path, selector: &SelectorArgs) -> Result<()> {
    // Opening validates the config and syncs the registry.
    let engine = open_engine(config_path)?;
    println!("Sync configuration: OK");

    let results = engine.check(&selector.selector()).await;
    if results.is_empty() {
        anyhow::bail!("No active mappings matched");
    }

    for result in &results {
        let status = if result.is_ok() { "OK" } else { "FAILED" };
        println!("{:24} {}", format!("{}:", result.entity_type), status);
        for problem in &result.problems {
            println!("  {problem}");
        }
    }

    let duplicates = engine.duplicates()?;
    for (entity_type, ids) in &duplicates {
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        println!(
            "{:24} FAILED\n  several active mappings ({})",
            format!("{entity_type} registry:"),
            ids.join(", ")
        );
    }

    if duplicates.is_empty() && results.iter().all(syncforge_engine::CheckResult::is_ok) {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

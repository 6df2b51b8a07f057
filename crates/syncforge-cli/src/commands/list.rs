use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use syncforge_state::MappingFilter;

use super::open_engine;

/// Execute the `list` command: registered mappings with their watermarks.
pub fn execute(
    config_path: &Path,
    entity_type: Option<String>,
    source: Option<String>,
    target: Option<String>,
    include_inactive: bool,
) -> Result<()> {
    let engine = open_engine(config_path)?;
    let filter = MappingFilter {
        entity_type,
        source,
        target,
        active_only: !include_inactive,
    };
    let mappings = engine.list(&filter)?;
    if mappings.is_empty() {
        println!("No mappings registered.");
        return Ok(());
    }

    println!(
        "{:>4}  {:<18} {:<16} {:<16} {:<10} {:<20} {:<20}",
        "ID", "ENTITY TYPE", "SOURCE", "TARGET", "ACTIVE", "LAST SUCCESS", "LAST ATTEMPT"
    );
    for status in &mappings {
        let mapping = &status.mapping;
        println!(
            "{:>4}  {:<18} {:<16} {:<16} {:<10} {:<20} {:<20}",
            mapping.id.get(),
            mapping.entity_type,
            mapping.source,
            mapping.target,
            if mapping.active { "yes" } else { "no" },
            format_time(status.watermark.last_successful_sync_time),
            format_time(status.watermark.last_sync_time),
        );
    }

    for (entity_type, ids) in engine.duplicates()? {
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        println!(
            "\nWarning: entity type '{entity_type}' has several active mappings ({})",
            ids.join(", ")
        );
    }
    Ok(())
}

pub(crate) fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

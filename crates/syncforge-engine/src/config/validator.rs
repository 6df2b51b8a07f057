//! Semantic validation for parsed sync configuration values.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::config::types::{parse_duration, ConflictStrategy, MappingConfig, SyncConfig};
use crate::registry::ComponentRegistry;

fn validate_schedule(mapping: &MappingConfig, context: &str, errors: &mut Vec<String>) {
    let Some(schedule) = &mapping.schedule else {
        return;
    };
    for (name, value) in [
        ("incremental_every", &schedule.incremental_every),
        ("full_every", &schedule.full_every),
    ] {
        if let Some(raw) = value {
            if let Err(e) = parse_duration(raw) {
                errors.push(format!("{context}: invalid schedule.{name}: {e}"));
            }
        }
    }
    if schedule.family.as_deref().is_some_and(|f| f.trim().is_empty()) {
        errors.push(format!("{context}: schedule.family must not be empty"));
    }
}

fn validate_components(
    mapping: &MappingConfig,
    context: &str,
    registry: &ComponentRegistry,
    errors: &mut Vec<String>,
) {
    if registry.has_extractor(&mapping.source.extractor) {
        // Construction is offline; it catches bad options without touching the source.
        if let Err(e) = registry.build_extractor(&mapping.source) {
            errors.push(format!("{context}: source: {}", e.message));
        }
    } else {
        errors.push(format!(
            "{context}: unknown extractor '{}'",
            mapping.source.extractor
        ));
    }

    if registry.has_transformer(&mapping.transformer.use_ref) {
        if let Err(e) = registry.build_transformer(mapping) {
            errors.push(format!("{context}: transformer: {}", e.message));
        }
    } else {
        errors.push(format!(
            "{context}: unknown transformer '{}'",
            mapping.transformer.use_ref
        ));
    }

    if !registry.has_loader(&mapping.loader.use_ref) {
        errors.push(format!(
            "{context}: unknown loader '{}'",
            mapping.loader.use_ref
        ));
    }
}

fn validate_loader(
    mapping: &MappingConfig,
    context: &str,
    entity_types: &BTreeMap<&str, usize>,
    errors: &mut Vec<String>,
) {
    let loader = &mapping.loader;
    if loader.destination.trim().is_empty() {
        errors.push(format!("{context}: loader destination must not be empty"));
    }
    if loader.conflict_strategy == ConflictStrategy::NewestWins && loader.timestamp_field.is_none() {
        errors.push(format!(
            "{context}: conflict_strategy 'newest_wins' requires timestamp_field"
        ));
    }
    match (&loader.parent_field, &loader.parent_mapping) {
        (Some(_), None) => errors.push(format!(
            "{context}: parent_field requires parent_mapping"
        )),
        (None, Some(_)) => errors.push(format!(
            "{context}: parent_mapping requires parent_field"
        )),
        (Some(_), Some(parent)) if !entity_types.contains_key(parent.as_str()) => {
            errors.push(format!(
                "{context}: parent_mapping '{parent}' is not a configured entity type"
            ));
        }
        _ => {}
    }
}

/// Validate a parsed sync configuration against the component registry.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing every validation failure found.
pub fn validate_config(config: &SyncConfig, registry: &ComponentRegistry) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.mappings.is_empty() {
        errors.push("At least one mapping must be configured".to_string());
    }

    if config.defaults.batch_size == 0 {
        errors.push("defaults.batch_size must be at least 1".to_string());
    }
    if config.defaults.page_timeout_seconds == 0 {
        errors.push("defaults.page_timeout_seconds must be > 0".to_string());
    }
    if config.defaults.commit_timeout_seconds == 0 {
        errors.push("defaults.commit_timeout_seconds must be > 0".to_string());
    }
    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        errors.push(format!(
            "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
            config.retry.base_delay_ms, config.retry.max_delay_ms
        ));
    }
    if config.scheduler.workers == 0 {
        errors.push("scheduler.workers must be at least 1".to_string());
    }

    let mut active_per_type: BTreeMap<&str, usize> = BTreeMap::new();
    for mapping in &config.mappings {
        let count = active_per_type.entry(mapping.entity_type.as_str()).or_default();
        if mapping.active {
            *count += 1;
        }
    }
    for (entity_type, count) in &active_per_type {
        if *count > 1 {
            errors.push(format!(
                "Entity type '{entity_type}' has {count} active mappings; at most one may be active"
            ));
        }
    }

    let mut triples = BTreeMap::new();
    for (i, mapping) in config.mappings.iter().enumerate() {
        let context = if mapping.entity_type.trim().is_empty() {
            errors.push(format!("Mapping {i} has an empty entity_type"));
            format!("mappings[{i}]")
        } else {
            format!("Mapping '{}'", mapping.entity_type)
        };

        if mapping.source.name.trim().is_empty() {
            errors.push(format!("{context}: source name must not be empty"));
        }

        let triple = (
            mapping.source.name.as_str(),
            mapping.loader.destination.as_str(),
            mapping.entity_type.as_str(),
        );
        if let Some(first) = triples.insert(triple, i) {
            errors.push(format!(
                "{context}: duplicates mappings[{first}] (same source, destination, and entity type)"
            ));
        }

        validate_components(mapping, &context, registry, &mut errors);
        validate_loader(mapping, &context, &active_per_type, &mut errors);
        validate_schedule(mapping, &context, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Sync configuration validation failed:\n  - {}", errors.join("\n  - "));
    }
}

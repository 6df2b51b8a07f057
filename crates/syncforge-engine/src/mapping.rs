//! Mapping registry bootstrap.
//!
//! Loads the declarative configuration into the state backend. Every
//! write is an upsert, so loading the same file twice converges on the
//! same source, target, and mapping rows.

use anyhow::{Context, Result};
use syncforge_state::StateBackend;
use syncforge_types::state::MappingId;

use crate::config::types::{MappingConfig, SyncConfig};

/// A configured mapping and its registry id.
#[derive(Debug, Clone)]
pub struct RegisteredMapping {
    pub id: MappingId,
    pub config: MappingConfig,
}

/// Outcome of [`sync_registry`].
#[derive(Debug, Clone, Default)]
pub struct RegistrySync {
    /// Registered mappings in configuration order.
    pub mappings: Vec<RegisteredMapping>,
    /// Mappings present in the registry but absent from the file, now inactive.
    pub deactivated: u64,
}

impl RegistrySync {
    #[must_use]
    pub fn get(&self, id: MappingId) -> Option<&RegisteredMapping> {
        self.mappings.iter().find(|m| m.id == id)
    }
}

/// Register one mapping with its source and target.
///
/// # Errors
///
/// Returns an error if the mapping cannot be serialized or the backend
/// write fails.
pub fn register_mapping(state: &dyn StateBackend, mapping: &MappingConfig) -> Result<MappingId> {
    let source_id = state
        .upsert_source(
            &mapping.source.name,
            &mapping.source.extractor,
            &mapping.source.config,
        )
        .with_context(|| format!("Failed to register source '{}'", mapping.source.name))?;

    let loader = &mapping.loader;
    let target_id = state
        .upsert_target(
            &loader.destination,
            &loader.use_ref,
            loader.unique_field.as_deref(),
            loader.conflict_strategy.as_str(),
        )
        .with_context(|| format!("Failed to register target '{}'", loader.destination))?;

    let config = serde_json::to_value(mapping)
        .with_context(|| format!("Failed to serialize mapping '{}'", mapping.entity_type))?;
    state
        .upsert_mapping(
            source_id,
            target_id,
            &mapping.entity_type,
            mapping.active,
            &config,
        )
        .with_context(|| format!("Failed to register mapping '{}'", mapping.entity_type))
}

/// Register every configured mapping and switch off registry mappings the
/// file no longer mentions.
///
/// # Errors
///
/// Returns the first backend failure.
pub fn sync_registry(state: &dyn StateBackend, config: &SyncConfig) -> Result<RegistrySync> {
    let mut mappings = Vec::with_capacity(config.mappings.len());
    for mapping in &config.mappings {
        let id = register_mapping(state, mapping)?;
        tracing::debug!(
            mapping = %id,
            entity_type = mapping.entity_type,
            source = mapping.source.name,
            target = mapping.loader.destination,
            active = mapping.active,
            "Registered mapping"
        );
        mappings.push(RegisteredMapping {
            id,
            config: mapping.clone(),
        });
    }

    let keep: Vec<MappingId> = mappings.iter().map(|m| m.id).collect();
    let deactivated = state
        .deactivate_except(&keep)
        .context("Failed to deactivate removed mappings")?;
    if deactivated > 0 {
        tracing::info!(deactivated, "Deactivated mappings no longer in configuration");
    }

    let duplicates = state
        .duplicate_active_mappings()
        .context("Failed to check for duplicate active mappings")?;
    for (entity_type, ids) in &duplicates {
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        tracing::warn!(
            entity_type,
            mappings = ids.join(","),
            "More than one active mapping for entity type"
        );
    }

    Ok(RegistrySync {
        mappings,
        deactivated,
    })
}

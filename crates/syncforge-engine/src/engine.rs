//! Sync engine: the configuration, registries, and backends a pipeline
//! needs, constructed once at process start and shared by reference.

use std::sync::Arc;

use anyhow::{Context, Result};
use syncforge_state::{MappingFilter, SqliteStateBackend, StateBackend};
use syncforge_types::state::{FailedRecord, MappingId, MappingRecord, RunId, RunMode, RunRecord, Watermark};

use crate::config::{validate_config, SyncConfig};
use crate::errors::PipelineError;
use crate::load::sqlite::LoaderContext;
use crate::load::LocalStore;
use crate::mapping::{sync_registry, RegisteredMapping, RegistrySync};
use crate::pipeline::{Components, Pipeline, PipelineSettings, RunRequest};
use crate::registry::ComponentRegistry;
use crate::result::{CheckResult, MappingOutcome};
use crate::retry::{run_with_retry, RetryPolicy};

/// Which configured mappings a trigger targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingSelector {
    /// Every active mapping.
    All,
    /// One mapping by registry id, active or not.
    Id(MappingId),
    EntityType(String),
    /// Active mappings reading from the named source.
    Source(String),
    /// Active mappings writing to the named destination.
    Target(String),
    /// Active mappings in a scheduling family.
    Family(String),
}

impl MappingSelector {
    #[must_use]
    pub fn matches(&self, mapping: &RegisteredMapping) -> bool {
        let config = &mapping.config;
        match self {
            Self::Id(id) => mapping.id == *id,
            _ if !config.active => false,
            Self::All => true,
            Self::EntityType(entity_type) => config.entity_type == *entity_type,
            Self::Source(source) => config.source.name == *source,
            Self::Target(target) => config.loader.destination == *target,
            Self::Family(family) => config.family() == family.as_str(),
        }
    }
}

/// A registry mapping with its watermark, for listing.
#[derive(Debug, Clone)]
pub struct MappingStatus {
    pub mapping: MappingRecord,
    pub watermark: Watermark,
    pub family: Option<String>,
}

pub struct SyncEngine {
    config: SyncConfig,
    components: ComponentRegistry,
    state: Arc<dyn StateBackend>,
    store: Arc<LocalStore>,
    registry: RegistrySync,
    settings: PipelineSettings,
    retry: RetryPolicy,
}

impl SyncEngine {
    /// Validate `config` against `components` and load it into the mapping
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns every configuration problem in one error, or the first state
    /// backend failure while syncing the registry.
    pub fn new(
        config: SyncConfig,
        components: ComponentRegistry,
        state: Arc<dyn StateBackend>,
        store: Arc<LocalStore>,
    ) -> Result<Self> {
        validate_config(&config, &components)?;
        let registry = sync_registry(state.as_ref(), &config)?;
        let settings = PipelineSettings::from_config(&config);
        let retry = RetryPolicy::from_config(&config.retry);
        tracing::info!(
            mappings = registry.mappings.len(),
            deactivated = registry.deactivated,
            "Sync engine ready"
        );
        Ok(Self {
            config,
            components,
            state,
            store,
            registry,
            settings,
            retry,
        })
    }

    /// Open the state database and local store named in `config`, with the
    /// built-in components.
    ///
    /// # Errors
    ///
    /// Returns an error if either database cannot be opened or the
    /// configuration is invalid.
    pub fn open(config: SyncConfig) -> Result<Self> {
        let state = SqliteStateBackend::open(&config.state.path).with_context(|| {
            format!("Failed to open state database {}", config.state.path.display())
        })?;
        let store = LocalStore::open(&config.store.path).with_context(|| {
            format!("Failed to open local store {}", config.store.path.display())
        })?;
        Self::new(
            config,
            ComponentRegistry::with_builtins(),
            Arc::new(state),
            Arc::new(store),
        )
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> &Arc<dyn StateBackend> {
        &self.state
    }

    #[must_use]
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Every configured mapping, in configuration order.
    #[must_use]
    pub fn mappings(&self) -> &[RegisteredMapping] {
        &self.registry.mappings
    }

    #[must_use]
    pub fn select(&self, selector: &MappingSelector) -> Vec<&RegisteredMapping> {
        self.registry
            .mappings
            .iter()
            .filter(|m| selector.matches(m))
            .collect()
    }

    /// A request using the configured default batch size.
    #[must_use]
    pub fn request(&self, mode: RunMode) -> RunRequest {
        RunRequest::new(mode, self.config.defaults.batch_size)
    }

    /// Build a fresh pipeline for one mapping. Components are never reused
    /// across runs, so every run rebuilds its parent lookup.
    ///
    /// # Errors
    ///
    /// Returns a config error if a component cannot be constructed.
    pub fn build_pipeline(&self, mapping: &RegisteredMapping) -> Result<Pipeline, PipelineError> {
        let config = &mapping.config;
        let extractor = self.components.build_extractor(&config.source)?;
        let transformer = self.components.build_transformer(config)?;
        let parent_destination = config
            .loader
            .parent_mapping
            .as_deref()
            .and_then(|entity| self.config.mapping_for(entity))
            .map(|parent| parent.loader.destination.clone());
        let loader = self.components.build_loader(
            &config.loader,
            LoaderContext {
                store: Arc::clone(&self.store),
                parent_destination,
            },
        )?;
        Ok(Pipeline::new(
            mapping.id,
            config.entity_type.clone(),
            Components {
                extractor,
                transformer,
                loader,
            },
            Arc::clone(&self.state),
            self.settings.clone(),
        ))
    }

    /// Run one mapping under the retry policy. Each attempt gets its own run
    /// record.
    pub async fn run_mapping(&self, id: MappingId, request: &RunRequest) -> MappingOutcome {
        let Some(mapping) = self.registry.get(id) else {
            return MappingOutcome {
                mapping_id: id,
                entity_type: String::new(),
                attempts: Vec::new(),
                error: Some(PipelineError::Infrastructure(anyhow::anyhow!(
                    "mapping {id} is not in the loaded configuration"
                ))),
            };
        };

        let outcome = run_with_retry(&self.retry, &mapping.config.entity_type, |attempt| {
            let request = request.clone().with_attempt(attempt);
            async move {
                let mut pipeline = self.build_pipeline(mapping)?;
                pipeline.run(&request).await
            }
        })
        .await;

        MappingOutcome {
            mapping_id: id,
            entity_type: mapping.config.entity_type.clone(),
            attempts: outcome.attempts,
            error: outcome.error,
        }
    }

    /// Check each selected mapping's source without running it.
    pub async fn check(&self, selector: &MappingSelector) -> Vec<CheckResult> {
        let mut results = Vec::new();
        for mapping in self.select(selector) {
            let mut problems = Vec::new();
            let source_ok = match self.components.build_extractor(&mapping.config.source) {
                Ok(mut extractor) => match extractor.connect().await {
                    Ok(()) => true,
                    Err(e) => {
                        problems.push(format!("source '{}': {e}", mapping.config.source.name));
                        false
                    }
                },
                Err(e) => {
                    problems.push(format!("source '{}': {e}", mapping.config.source.name));
                    false
                }
            };
            if let Err(e) = self.build_pipeline(mapping) {
                problems.push(e.to_string());
            }
            results.push(CheckResult {
                entity_type: mapping.config.entity_type.clone(),
                source_ok,
                problems,
            });
        }
        results
    }

    /// Registry mappings with their watermarks.
    ///
    /// # Errors
    ///
    /// Returns an error if the state backend cannot be read.
    pub fn list(&self, filter: &MappingFilter) -> Result<Vec<MappingStatus>> {
        let mappings = self
            .state
            .list_mappings(filter)
            .context("Failed to list mappings")?;
        mappings
            .into_iter()
            .map(|mapping| {
                let watermark = self
                    .state
                    .get_watermark(mapping.id)
                    .with_context(|| format!("Failed to read watermark for mapping {}", mapping.id))?;
                let family = self
                    .registry
                    .get(mapping.id)
                    .map(|m| m.config.family().to_string());
                Ok(MappingStatus {
                    mapping,
                    watermark,
                    family,
                })
            })
            .collect()
    }

    /// Most recent runs first.
    ///
    /// # Errors
    ///
    /// Returns an error if the state backend cannot be read.
    pub fn runs(&self, mapping: Option<MappingId>, limit: usize) -> Result<Vec<RunRecord>> {
        self.state
            .list_runs(mapping, limit)
            .context("Failed to list runs")
    }

    /// # Errors
    ///
    /// Returns an error if the state backend cannot be read.
    pub fn run(&self, id: RunId) -> Result<Option<RunRecord>> {
        self.state.get_run(id).context("Failed to read run")
    }

    /// # Errors
    ///
    /// Returns an error if the state backend cannot be read.
    pub fn failed_records(&self, run: RunId) -> Result<Vec<FailedRecord>> {
        self.state
            .list_failed_records(run)
            .context("Failed to list failed records")
    }

    /// Entity types with more than one active mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the state backend cannot be read.
    pub fn duplicates(&self) -> Result<Vec<(String, Vec<MappingId>)>> {
        self.state
            .duplicate_active_mappings()
            .context("Failed to check duplicate mappings")
    }
}

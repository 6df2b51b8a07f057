//! Component registry: stable string keys to constructors.
//!
//! Configuration names extractors, transformers, and loaders by key. Every
//! key is checked against the registry when the configuration is validated,
//! so an unknown component fails at load time rather than mid-run.

use std::collections::BTreeMap;
use std::sync::Arc;

use syncforge_types::SyncError;

use crate::config::types::{LoaderConfig, MappingConfig, SourceConfig};
use crate::extract::{self, Extractor};
use crate::load::sqlite::LoaderContext;
use crate::load::{self, Loader};
use crate::transform::{self, Transformer};

pub type ExtractorFactory =
    Arc<dyn Fn(&SourceConfig) -> Result<Box<dyn Extractor>, SyncError> + Send + Sync>;
pub type TransformerFactory =
    Arc<dyn Fn(&MappingConfig) -> Result<Box<dyn Transformer>, SyncError> + Send + Sync>;
pub type LoaderFactory =
    Arc<dyn Fn(&LoaderConfig, LoaderContext) -> Result<Box<dyn Loader>, SyncError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ComponentRegistry {
    extractors: BTreeMap<String, ExtractorFactory>,
    transformers: BTreeMap<String, TransformerFactory>,
    loaders: BTreeMap<String, LoaderFactory>,
}

impl ComponentRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in component.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .with_extractor(extract::sqlite::KIND, |source| {
                Ok(Box::new(extract::SqliteTableExtractor::from_config(source)?))
            })
            .with_extractor(extract::inline::KIND, |source| {
                Ok(Box::new(extract::InlineExtractor::from_config(source)?))
            })
            .with_transformer(transform::field_map::KIND, |mapping| {
                Ok(Box::new(transform::FieldMapTransformer::from_config(mapping)?))
            })
            .with_loader(load::sqlite::KIND, |config, ctx| {
                Ok(Box::new(load::SqliteTableLoader::new(config, ctx)?))
            })
    }

    #[must_use]
    pub fn with_extractor(
        mut self,
        key: impl Into<String>,
        factory: impl Fn(&SourceConfig) -> Result<Box<dyn Extractor>, SyncError> + Send + Sync + 'static,
    ) -> Self {
        self.extractors.insert(key.into(), Arc::new(factory));
        self
    }

    #[must_use]
    pub fn with_transformer(
        mut self,
        key: impl Into<String>,
        factory: impl Fn(&MappingConfig) -> Result<Box<dyn Transformer>, SyncError> + Send + Sync + 'static,
    ) -> Self {
        self.transformers.insert(key.into(), Arc::new(factory));
        self
    }

    #[must_use]
    pub fn with_loader(
        mut self,
        key: impl Into<String>,
        factory: impl Fn(&LoaderConfig, LoaderContext) -> Result<Box<dyn Loader>, SyncError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.loaders.insert(key.into(), Arc::new(factory));
        self
    }

    #[must_use]
    pub fn has_extractor(&self, key: &str) -> bool {
        self.extractors.contains_key(key)
    }

    #[must_use]
    pub fn has_transformer(&self, key: &str) -> bool {
        self.transformers.contains_key(key)
    }

    #[must_use]
    pub fn has_loader(&self, key: &str) -> bool {
        self.loaders.contains_key(key)
    }

    /// # Errors
    ///
    /// Returns a config error for an unknown key or invalid source config.
    pub fn build_extractor(&self, source: &SourceConfig) -> Result<Box<dyn Extractor>, SyncError> {
        let factory = self.extractors.get(&source.extractor).ok_or_else(|| {
            unknown("UNKNOWN_EXTRACTOR", "extractor", &source.extractor, self.extractors.keys())
        })?;
        factory(source)
    }

    /// # Errors
    ///
    /// Returns a config error for an unknown key or invalid transformer config.
    pub fn build_transformer(&self, mapping: &MappingConfig) -> Result<Box<dyn Transformer>, SyncError> {
        let key = &mapping.transformer.use_ref;
        let factory = self.transformers.get(key).ok_or_else(|| {
            unknown("UNKNOWN_TRANSFORMER", "transformer", key, self.transformers.keys())
        })?;
        factory(mapping)
    }

    /// # Errors
    ///
    /// Returns a config error for an unknown key or invalid loader config.
    pub fn build_loader(
        &self,
        config: &LoaderConfig,
        ctx: LoaderContext,
    ) -> Result<Box<dyn Loader>, SyncError> {
        let factory = self.loaders.get(&config.use_ref).ok_or_else(|| {
            unknown("UNKNOWN_LOADER", "loader", &config.use_ref, self.loaders.keys())
        })?;
        factory(config, ctx)
    }
}

fn unknown<'a>(
    code: &str,
    role: &str,
    key: &str,
    known: impl Iterator<Item = &'a String>,
) -> SyncError {
    let known: Vec<&str> = known.map(String::as_str).collect();
    SyncError::config(
        code,
        format!("unknown {role} '{key}' (registered: {})", known.join(", ")),
    )
}

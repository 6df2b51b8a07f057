pub mod check;
pub mod list;
pub mod run;
pub mod runs;
pub mod serve;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use syncforge_engine::config::parser;
use syncforge_engine::{MappingSelector, SyncEngine};
use syncforge_types::state::MappingId;

/// Which mappings a command targets. At most one may be given; none means
/// every active mapping.
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct SelectorArgs {
    #[arg(long)]
    pub mapping_id: Option<i64>,
    #[arg(long)]
    pub entity_type: Option<String>,
    /// Source system name
    #[arg(long)]
    pub source: Option<String>,
    /// Destination name
    #[arg(long)]
    pub target: Option<String>,
    /// Scheduling family
    #[arg(long)]
    pub family: Option<String>,
    /// Every active mapping (the default)
    #[arg(long)]
    pub all: bool,
}

impl SelectorArgs {
    pub fn selector(&self) -> MappingSelector {
        if let Some(id) = self.mapping_id {
            MappingSelector::Id(MappingId::new(id))
        } else if let Some(entity_type) = &self.entity_type {
            MappingSelector::EntityType(entity_type.clone())
        } else if let Some(source) = &self.source {
            MappingSelector::Source(source.clone())
        } else if let Some(target) = &self.target {
            MappingSelector::Target(target.clone())
        } else if let Some(family) = &self.family {
            MappingSelector::Family(family.clone())
        } else {
            MappingSelector::All
        }
    }
}

/// Parse the sync file, then open state and store and load the registry.
pub fn open_engine(config_path: &Path) -> Result<SyncEngine> {
    let config = parser::parse_config(config_path)
        .with_context(|| format!("Failed to parse sync config: {}", config_path.display()))?;
    SyncEngine::open(config)
}

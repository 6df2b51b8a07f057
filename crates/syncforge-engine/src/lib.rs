//! Extract/transform/load engine for syncforge.
//!
//! Configuration is parsed and validated once, loaded into the mapping
//! registry, and handed to a [`SyncEngine`]. The engine builds one
//! [`Pipeline`] per run, wraps it in the retry policy, and the scheduler
//! fans runs out across mappings.

#![warn(clippy::pedantic)]

pub mod config;
pub mod engine;
pub mod errors;
pub mod extract;
pub(crate) mod failed;
pub mod load;
pub mod mapping;
pub mod pipeline;
pub mod registry;
pub mod result;
pub mod retry;
pub mod scheduler;
pub mod transform;

// Re-export public API for convenience
pub use config::{parse_config, parse_config_str, validate_config, SyncConfig};
pub use engine::{MappingSelector, MappingStatus, SyncEngine};
pub use errors::PipelineError;
pub use pipeline::{Pipeline, PipelineSettings, RunRequest};
pub use registry::ComponentRegistry;
pub use result::{CheckResult, MappingOutcome, PipelineResult};
pub use retry::{run_with_retry, RetryPolicy};
pub use scheduler::{run_all, serve, triggers, CadenceTrigger};

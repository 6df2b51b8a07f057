//! Background execution: fan-out across mappings and cadence triggers.
//!
//! Mappings are independent units. [`run_all`] dispatches one task per
//! selected mapping, bounded by `scheduler.workers`; a failing mapping never
//! blocks or rolls back another. [`serve`] fires incremental and full runs
//! per scheduling family until shutdown is requested.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use syncforge_types::state::{MappingId, RunMode, RunStatus};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::types::{parse_duration, SyncConfig};
use crate::engine::{MappingSelector, SyncEngine};
use crate::errors::PipelineError;
use crate::pipeline::RunRequest;
use crate::result::MappingOutcome;

/// Run every mapping matched by `selector`, one task per mapping.
/// Outcomes are returned in configuration order.
pub async fn run_all(
    engine: Arc<SyncEngine>,
    selector: &MappingSelector,
    request: &RunRequest,
) -> Vec<MappingOutcome> {
    let targets: Vec<(MappingId, String)> = engine
        .select(selector)
        .into_iter()
        .map(|m| (m.id, m.config.entity_type.clone()))
        .collect();
    if targets.is_empty() {
        tracing::warn!(selector = ?selector, "No active mappings matched");
        return Vec::new();
    }

    let workers = engine.config().scheduler.workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    tracing::info!(
        mappings = targets.len(),
        workers,
        mode = %request.mode,
        "Dispatching mapping runs"
    );

    let mut join_set: JoinSet<(usize, MappingOutcome)> = JoinSet::new();
    for (slot, (id, _)) in targets.iter().enumerate() {
        let engine = Arc::clone(&engine);
        let semaphore = Arc::clone(&semaphore);
        let request = request.clone();
        let id = *id;
        join_set.spawn(async move {
            // Never closed.
            let _permit = semaphore.acquire_owned().await.ok();
            (slot, engine.run_mapping(id, &request).await)
        });
    }

    let mut outcomes: Vec<Option<MappingOutcome>> = targets.iter().map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((slot, outcome)) => outcomes[slot] = Some(outcome),
            Err(join_err) => {
                tracing::error!(error = %join_err, "Mapping task panicked");
            }
        }
    }

    outcomes
        .into_iter()
        .zip(targets)
        .map(|(outcome, (id, entity_type))| {
            outcome.unwrap_or_else(|| MappingOutcome {
                mapping_id: id,
                entity_type,
                attempts: Vec::new(),
                error: Some(PipelineError::Infrastructure(anyhow::anyhow!(
                    "mapping task panicked"
                ))),
            })
        })
        .collect()
}

/// A recurring run for one scheduling family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadenceTrigger {
    pub family: String,
    pub mode: RunMode,
    pub every: Duration,
}

/// Triggers derived from the active mappings' schedule hints. When
/// mappings in one family disagree, the shortest period wins.
#[must_use]
pub fn triggers(config: &SyncConfig) -> Vec<CadenceTrigger> {
    let mut periods: BTreeMap<(String, bool), Duration> = BTreeMap::new();
    for mapping in config.mappings.iter().filter(|m| m.active) {
        let Some(schedule) = &mapping.schedule else {
            continue;
        };
        for (is_full, raw) in [
            (false, &schedule.incremental_every),
            (true, &schedule.full_every),
        ] {
            let Some(raw) = raw else { continue };
            match parse_duration(raw) {
                Ok(every) => {
                    periods
                        .entry((mapping.family().to_string(), is_full))
                        .and_modify(|d| *d = (*d).min(every))
                        .or_insert(every);
                }
                Err(e) => tracing::warn!(
                    entity_type = mapping.entity_type,
                    error = e,
                    "Ignoring unparseable schedule"
                ),
            }
        }
    }
    periods
        .into_iter()
        .map(|((family, is_full), every)| CadenceTrigger {
            family,
            mode: if is_full { RunMode::Full } else { RunMode::Incremental },
            every,
        })
        .collect()
}

/// Fire cadence triggers until a message arrives on `shutdown_rx` (or its
/// sender is dropped). A triggered fan-out runs to completion before the
/// next trigger is considered.
///
/// # Errors
///
/// Currently infallible; the `Result` leaves room for startup failures.
pub async fn serve(engine: Arc<SyncEngine>, mut shutdown_rx: mpsc::Receiver<()>) -> anyhow::Result<()> {
    let triggers = triggers(engine.config());
    if triggers.is_empty() {
        tracing::warn!("No schedules configured; waiting for shutdown");
        shutdown_rx.recv().await;
        return Ok(());
    }
    for trigger in &triggers {
        tracing::info!(
            family = trigger.family,
            mode = %trigger.mode,
            every_secs = trigger.every.as_secs(),
            "Registered schedule"
        );
    }

    let start = Instant::now();
    let mut due: Vec<Instant> = triggers.iter().map(|t| start + t.every).collect();

    loop {
        let (index, at) = due
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|(_, at)| *at)
            .unwrap_or((0, start));

        tokio::select! {
            () = tokio::time::sleep_until(at) => {
                let trigger = &triggers[index];
                due[index] = Instant::now() + trigger.every;
                let request = engine.request(trigger.mode);
                let outcomes = run_all(
                    Arc::clone(&engine),
                    &MappingSelector::Family(trigger.family.clone()),
                    &request,
                )
                .await;
                log_fan_out(&trigger.family, trigger.mode, &outcomes);
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Shutdown requested, scheduler stopping");
                break;
            }
        }
    }
    Ok(())
}

fn log_fan_out(family: &str, mode: RunMode, outcomes: &[MappingOutcome]) {
    let count = |status: RunStatus| outcomes.iter().filter(|o| o.status() == status).count();
    tracing::info!(
        family,
        mode = %mode,
        completed = count(RunStatus::Completed),
        partial = count(RunStatus::Partial),
        failed = count(RunStatus::Failed),
        "Scheduled runs finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config_str;

    const YAML: &str = r#"
version: "1.0"
mappings:
  - entity_type: family
    source: { name: erp, extractor: inline, config: { records: [] } }
    transformer: { field_mappings: { FAM: code } }
    loader: { use: sqlite_table, destination: families, unique_field: code }
    schedule: { family: catalog, incremental_every: 30m, full_every: 24h }
  - entity_type: product
    source: { name: erp, extractor: inline, config: { records: [] } }
    transformer: { field_mappings: { ITEM_NO: sku } }
    loader: { use: sqlite_table, destination: products, unique_field: sku }
    schedule: { family: catalog, incremental_every: 15m }
  - entity_type: customer
    source: { name: crm, extractor: inline, config: { records: [] } }
    transformer: { field_mappings: { NO: code } }
    loader: { use: sqlite_table, destination: customers, unique_field: code }
    schedule: { full_every: 7d }
  - entity_type: legacy
    active: false
    source: { name: crm, extractor: inline, config: { records: [] } }
    transformer: { field_mappings: { NO: code } }
    loader: { use: sqlite_table, destination: legacy, unique_field: code }
    schedule: { incremental_every: 1m }
"#;

    #[test]
    fn triggers_group_by_family_and_take_shortest_period() {
        let config = parse_config_str(YAML).unwrap();
        let triggers = triggers(&config);
        assert_eq!(
            triggers,
            vec![
                CadenceTrigger {
                    family: "catalog".into(),
                    mode: RunMode::Incremental,
                    every: Duration::from_secs(15 * 60),
                },
                CadenceTrigger {
                    family: "catalog".into(),
                    mode: RunMode::Full,
                    every: Duration::from_secs(24 * 3600),
                },
                CadenceTrigger {
                    family: "customer".into(),
                    mode: RunMode::Full,
                    every: Duration::from_secs(7 * 86_400),
                },
            ]
        );
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        use crate::load::LocalStore;
        use crate::registry::ComponentRegistry;
        use syncforge_state::SqliteStateBackend;

        let engine = SyncEngine::new(
            parse_config_str(YAML).unwrap(),
            ComponentRegistry::with_builtins(),
            Arc::new(SqliteStateBackend::in_memory().unwrap()),
            Arc::new(LocalStore::in_memory().unwrap()),
        )
        .unwrap();
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(serve(Arc::new(engine), rx));
        tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

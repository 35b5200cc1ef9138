//! One synchronization cycle for one entity.
//!
//! ```text
//! read watermark ─┬─ none ──► full load ─────────┐
//!                 └─ some ──► incremental load ──┤
//!                                                ▼
//!                        merge and/or apply versions (per target)
//!                                                ▼
//!                        initialize / advance watermark
//! ```
//!
//! Every step is its own transaction. The watermark is written last and
//! only from maxima of rows already committed to the targets, so a failed
//! cycle leaves the watermark where it was and can simply be re-run.

use checkpoint::{Clock, SystemClock, Watermark, WatermarkError, WatermarkManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use sync_core::{EntityConfig, Target};
use sync_storage::Storage;
use tracing::{debug, info};

use crate::events::StepRecorder;
use crate::merge::{merge_staging, MergeReport};
use crate::staging::{full_load, incremental_load, LoadReport};
use crate::transaction::begin;
use crate::versioning::{version_staging, VersionReport};
use crate::watermark::{advance_watermark, commit_or_rollback, try_read_watermark};
use crate::{Step, StepObserver, StepReport, SyncError};

/// Options of a cycle.
pub struct CycleOptions {
    /// Targets to write; `None` writes every configured target.
    pub targets: Option<Vec<Target>>,
    /// Source of the first-cycle snapshot instant.
    pub clock: Arc<dyn Clock>,
    pub observer: Option<Arc<dyn StepObserver>>,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            targets: None,
            clock: Arc::new(SystemClock),
            observer: None,
        }
    }
}

impl CycleOptions {
    pub fn with_targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// What the cycle did to the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkUpdate {
    /// First cycle: the watermark was created
    Initialized,
    Advanced,
    /// Nothing was staged, or the staged maxima were already covered
    Unchanged,
    /// The advance would have decreased the stored value and was skipped
    RegressionSkipped,
}

/// Result of a successful cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub entity: String,
    pub load: LoadReport,
    pub merge: Option<MergeReport>,
    pub versions: Option<VersionReport>,
    pub previous_watermark: Option<Watermark>,
    /// Watermark after the cycle (the starting one when the advance was skipped)
    pub watermark: Watermark,
    pub watermark_update: WatermarkUpdate,
    pub steps: Vec<StepReport>,
}

/// Run `step`, recording its outcome.
async fn tracked<T, F>(
    recorder: &mut StepRecorder<'_>,
    step: Step,
    rows: impl Fn(&T) -> u64,
    step_future: F,
) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    let started = Instant::now();
    match step_future.await {
        Ok(value) => {
            recorder.succeeded(step, started, rows(&value));
            Ok(value)
        }
        Err(e) => {
            recorder.failed(step, started, &e);
            Err(e)
        }
    }
}

/// Run one cycle for `entity`.
///
/// # Errors
///
/// - `SyncError::Config` for an invalid entity configuration (nothing is read)
/// - `SyncError::Connection` when the storage is unreachable
/// - `SyncError::StepTransaction` when a step fails; that step is rolled
///   back, later steps do not run and the watermark is not advanced
///
/// A watermark regression is not an error: the advance is skipped and
/// reported as [`WatermarkUpdate::RegressionSkipped`].
pub async fn run_cycle(
    storage: &dyn Storage,
    entity: &EntityConfig,
    options: &CycleOptions,
) -> Result<CycleSummary, SyncError> {
    entity.validate()?;
    let targets = entity.select_targets(options.targets.as_deref())?;
    let id = entity.entity.as_str();
    let mut recorder = StepRecorder::new(id, options.observer.as_deref());

    info!(
        "Starting cycle for '{}' on {} storage (targets: {})",
        id,
        storage.backend_name(),
        targets
            .iter()
            .map(Target::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let previous = tracked(
        &mut recorder,
        Step::ReadWatermark,
        |wm: &Option<Watermark>| u64::from(wm.is_some()),
        try_read_watermark(storage, id),
    )
    .await?;

    // Captured before the full load: rows changed while it runs are picked
    // up again by the next cycle.
    let snapshot_at = options.clock.now();

    let load = match &previous {
        None => {
            tracked(
                &mut recorder,
                Step::FullLoad,
                |r: &LoadReport| r.rows_loaded,
                full_load(storage, entity),
            )
            .await?
        }
        Some(watermark) => {
            tracked(
                &mut recorder,
                Step::IncrementalLoad,
                |r: &LoadReport| r.rows_loaded,
                incremental_load(storage, entity, watermark),
            )
            .await?
        }
    };

    let mut merge = None;
    let mut versions = None;
    for target in &targets {
        match target {
            Target::Current => {
                let report = tracked(
                    &mut recorder,
                    Step::Merge,
                    MergeReport::written,
                    merge_staging(storage, entity),
                )
                .await?;
                merge = Some(report);
            }
            Target::History => {
                let report = tracked(
                    &mut recorder,
                    Step::ApplyVersions,
                    VersionReport::written,
                    version_staging(storage, entity),
                )
                .await?;
                versions = Some(report);
            }
        }
    }

    let (watermark, watermark_update) = match &previous {
        None => {
            let watermark = tracked(
                &mut recorder,
                Step::InitializeWatermark,
                |_: &Watermark| 1,
                initialize_after_full_load(storage, id, snapshot_at, &load),
            )
            .await?;
            (watermark, WatermarkUpdate::Initialized)
        }
        Some(current) if load.rows_loaded == 0 => {
            debug!("Nothing staged for '{}', watermark stays", id);
            recorder.succeeded(Step::AdvanceWatermark, Instant::now(), 0);
            (current.clone(), WatermarkUpdate::Unchanged)
        }
        Some(current) => {
            let (created, modified) = current.merged_with(load.max_created, load.max_modified);
            let started = Instant::now();
            match advance_watermark(storage, id, created, modified).await {
                Ok(advanced) => {
                    let update = if advanced == *current {
                        WatermarkUpdate::Unchanged
                    } else {
                        WatermarkUpdate::Advanced
                    };
                    recorder.succeeded(
                        Step::AdvanceWatermark,
                        started,
                        u64::from(update == WatermarkUpdate::Advanced),
                    );
                    (advanced, update)
                }
                Err(e) if e.is_regression() => {
                    recorder.skipped(Step::AdvanceWatermark, started, e.to_string());
                    (current.clone(), WatermarkUpdate::RegressionSkipped)
                }
                Err(e) => {
                    recorder.failed(Step::AdvanceWatermark, started, &e);
                    return Err(e);
                }
            }
        }
    };

    info!(
        "Cycle for '{}' finished: {} rows staged, watermark {}",
        id,
        load.rows_loaded,
        watermark.to_cli_string()
    );

    Ok(CycleSummary {
        entity: id.to_string(),
        load,
        merge,
        versions,
        previous_watermark: previous,
        watermark,
        watermark_update,
        steps: recorder.into_reports(),
    })
}

/// Create the watermark at the pre-load snapshot instant, raised to the
/// maxima of the loaded rows, in one transaction.
async fn initialize_after_full_load(
    storage: &dyn Storage,
    entity: &str,
    snapshot_at: DateTime<Utc>,
    load: &LoadReport,
) -> Result<Watermark, SyncError> {
    let step = Step::InitializeWatermark;
    let manager = WatermarkManager::new();
    let mut tx = begin(storage, step, entity).await?;
    let result: Result<Watermark, WatermarkError> = async {
        let initial = manager
            .initialize_at(tx.as_mut(), entity, snapshot_at)
            .await?;
        let (created, modified) = initial.merged_with(load.max_created, load.max_modified);
        manager
            .advance(tx.as_mut(), entity, created, modified)
            .await
    }
    .await;
    commit_or_rollback(tx, result, step, entity).await
}

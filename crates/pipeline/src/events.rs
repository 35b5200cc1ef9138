//! Step events.
//!
//! Every step of a cycle produces one [`StepReport`]. Reports are logged
//! through `tracing` with structured fields (`step`, `entity`, `rows`,
//! `duration_ms`, `outcome`), handed to an optional [`StepObserver`] and
//! returned in the cycle summary.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// A logical step of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ReadWatermark,
    FullLoad,
    IncrementalLoad,
    Merge,
    ApplyVersions,
    InitializeWatermark,
    AdvanceWatermark,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::ReadWatermark => "read_watermark",
            Step::FullLoad => "full_load",
            Step::IncrementalLoad => "incremental_load",
            Step::Merge => "merge",
            Step::ApplyVersions => "apply_versions",
            Step::InitializeWatermark => "initialize_watermark",
            Step::AdvanceWatermark => "advance_watermark",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    /// The step ran but deliberately wrote nothing (e.g. a regressing
    /// watermark advance).
    Skipped,
    Failed,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepOutcome::Succeeded => "succeeded",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Structured event for one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub entity: String,
    pub outcome: StepOutcome,
    /// Rows read or written by the step
    pub rows: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Receives step events as they happen.
pub trait StepObserver: Send + Sync {
    fn on_step(&self, report: &StepReport);
}

/// Log a step event.
pub fn log_step(report: &StepReport) {
    let message = report.message.as_deref().unwrap_or("");
    match report.outcome {
        StepOutcome::Succeeded => info!(
            step = %report.step,
            entity = %report.entity,
            rows = report.rows,
            duration_ms = report.duration_ms,
            outcome = %report.outcome,
            "Step {} completed for '{}'",
            report.step,
            report.entity
        ),
        StepOutcome::Skipped => warn!(
            step = %report.step,
            entity = %report.entity,
            rows = report.rows,
            duration_ms = report.duration_ms,
            outcome = %report.outcome,
            "Step {} skipped for '{}': {}",
            report.step,
            report.entity,
            message
        ),
        StepOutcome::Failed => error!(
            step = %report.step,
            entity = %report.entity,
            rows = report.rows,
            duration_ms = report.duration_ms,
            outcome = %report.outcome,
            "Step {} failed for '{}': {}",
            report.step,
            report.entity,
            message
        ),
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Collects the step reports of one cycle.
pub(crate) struct StepRecorder<'a> {
    entity: &'a str,
    observer: Option<&'a dyn StepObserver>,
    reports: Vec<StepReport>,
}

impl<'a> StepRecorder<'a> {
    pub(crate) fn new(entity: &'a str, observer: Option<&'a dyn StepObserver>) -> Self {
        Self {
            entity,
            observer,
            reports: Vec::new(),
        }
    }

    pub(crate) fn succeeded(&mut self, step: Step, started: Instant, rows: u64) {
        self.record(step, started, StepOutcome::Succeeded, rows, None);
    }

    pub(crate) fn skipped(&mut self, step: Step, started: Instant, reason: String) {
        self.record(step, started, StepOutcome::Skipped, 0, Some(reason));
    }

    pub(crate) fn failed(&mut self, step: Step, started: Instant, err: &dyn std::error::Error) {
        self.record(step, started, StepOutcome::Failed, 0, Some(err.to_string()));
    }

    fn record(
        &mut self,
        step: Step,
        started: Instant,
        outcome: StepOutcome,
        rows: u64,
        message: Option<String>,
    ) {
        let report = StepReport {
            step,
            entity: self.entity.to_string(),
            outcome,
            rows,
            duration_ms: millis(started.elapsed()),
            message,
        };
        log_step(&report);
        if let Some(observer) = self.observer {
            observer.on_step(&report);
        }
        self.reports.push(report);
    }

    pub(crate) fn into_reports(self) -> Vec<StepReport> {
        self.reports
    }
}

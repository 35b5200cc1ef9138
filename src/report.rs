//! Cycle summaries and step event output.

use anyhow::Result;
use scd_sync_pipeline::{CycleSummary, StepObserver, StepReport, WatermarkUpdate};
use std::fmt::Write;
use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

use crate::OutputFormat;

/// Step observer writing one JSON document per line.
pub struct EventLog {
    file: Mutex<File>,
}

impl EventLog {
    /// Open `path` for appending, creating it if needed.
    pub fn append<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn write_event(&self, report: &StepReport) -> Result<()> {
        let mut line = serde_json::to_vec(report)?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(&line)?;
        Ok(())
    }
}

impl StepObserver for EventLog {
    fn on_step(&self, report: &StepReport) {
        // A broken event log must not fail the cycle
        if let Err(e) = self.write_event(report) {
            warn!("Failed to write step event: {e}");
        }
    }
}

/// Render a cycle summary for stdout.
pub fn render_summary(summary: &CycleSummary, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(summary)?),
        OutputFormat::Text => Ok(render_text(summary)?),
    }
}

fn render_text(summary: &CycleSummary) -> std::result::Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(out, "Entity: {}", summary.entity)?;
    writeln!(
        out,
        "  {} load: {} rows staged",
        summary.load.mode, summary.load.rows_loaded
    )?;

    if let Some(merge) = &summary.merge {
        writeln!(
            out,
            "  current: {} inserted, {} updated, {} unchanged",
            merge.inserted, merge.updated, merge.unchanged
        )?;
    }
    if let Some(versions) = &summary.versions {
        writeln!(
            out,
            "  history: {} inserted, {} closed, {} corrected, {} unchanged, {} stale",
            versions.inserted,
            versions.closed,
            versions.corrected,
            versions.unchanged,
            versions.stale
        )?;
    }

    let previous = summary
        .previous_watermark
        .as_ref()
        .map(|w| w.to_cli_string())
        .unwrap_or_else(|| "(none)".to_string());
    let update = match summary.watermark_update {
        WatermarkUpdate::Initialized => "initialized",
        WatermarkUpdate::Advanced => "advanced",
        WatermarkUpdate::Unchanged => "unchanged",
        WatermarkUpdate::RegressionSkipped => "regression skipped",
    };
    writeln!(
        out,
        "  watermark: {} -> {} ({})",
        previous,
        summary.watermark.to_cli_string(),
        update
    )?;

    writeln!(out, "  steps:")?;
    for step in &summary.steps {
        write!(
            out,
            "    {:<22} {:<10} {:>8} rows {:>6} ms",
            step.step.as_str(),
            step.outcome.to_string(),
            step.rows,
            step.duration_ms
        )?;
        if let Some(message) = &step.message {
            write!(out, "  {message}")?;
        }
        writeln!(out)?;
    }
    Ok(out)
}

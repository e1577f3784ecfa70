//! Report artifact: per-entry provenance plus run-level aggregates,
//! persisted as JSON, with a plain-text summary rendering.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::criteria::Criterion;
use crate::error::{DatcullError, Result};
use crate::filter::{Decision, FilterStats};
use crate::provider::{ProviderUsage, ScoreSet};

/// Everything recorded about one entry in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryReport {
    /// Final decision with provenance.
    pub decision: Decision,
    /// The provider's score set, when one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_set: Option<ScoreSet>,
}

/// Persisted artifact describing one complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Provider that scored the run.
    pub provider: String,
    /// Identity digest of the source collection.
    pub collection_digest: String,
    /// Collection name from the source header, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Criteria active during the run.
    pub criteria: Vec<Criterion>,
    /// Global inclusion threshold used by the filter engine.
    pub global_threshold: f64,
    /// Per-entry records, in collection order.
    pub entries: Vec<EntryReport>,
    /// Run-level aggregates.
    pub stats: FilterStats,
    /// Provider usage counters.
    pub usage: ProviderUsage,
}

impl Report {
    /// Ids of the entries the run decided to keep.
    pub fn kept_ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.decision.kept)
            .map(|e| e.decision.entry_id.as_str())
            .collect()
    }

    /// Save the report to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    DatcullError::Persistence(format!(
                        "failed to create directory '{}': {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let file = File::create(path).map_err(|e| {
            DatcullError::Persistence(format!("failed to create file '{}': {e}", path.display()))
        })?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| DatcullError::Persistence(format!("failed to serialize report: {e}")))?;
        info!(path = %path.display(), entries = self.entries.len(), "saved report");
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            DatcullError::Persistence(format!("failed to open file '{}': {e}", path.display()))
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| {
            DatcullError::Persistence(format!("failed to parse report '{}': {e}", path.display()))
        })
    }

    /// Render the human-readable summary of the run.
    pub fn render_summary(&self) -> String {
        let stats = &self.stats;
        let mut out = String::new();
        let _ = writeln!(out, "Curation summary");
        let _ = writeln!(out, "================");
        if let Some(name) = &self.collection_name {
            let _ = writeln!(out, "Collection:     {name}");
        }
        let _ = writeln!(out, "Provider:       {}", self.provider);
        let _ = writeln!(
            out,
            "Generated:      {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(
            out,
            "Criteria:       {}",
            self.criteria
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let _ = writeln!(out, "Threshold:      {:.1}", self.global_threshold);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Entries:        {} total, {} kept ({:.1}%), {} excluded",
            stats.total,
            stats.kept,
            percentage(stats.kept, stats.total),
            stats.excluded
        );
        let _ = writeln!(
            out,
            "Overrides:      {} applied, {} low-score exceptions",
            stats.overridden, stats.low_score_exceptions
        );
        let _ = writeln!(
            out,
            "Incomplete:     {} entries excluded for incomplete evaluation",
            stats.incomplete
        );
        if let (Some(strongest), Some(weakest)) =
            (&stats.strongest_criterion, &stats.weakest_criterion)
        {
            let _ = writeln!(out);
            let _ = writeln!(out, "Strongest criterion: {strongest}");
            let _ = writeln!(out, "Weakest criterion:   {weakest}");
        }
        for (name, criterion_stats) in &stats.criterion_stats {
            let _ = writeln!(
                out,
                "  {:<22} mean {:>4.1}   decided {:>5.1}% of kept",
                name,
                criterion_stats.mean_score,
                criterion_stats.deciding_fraction * 100.0
            );
        }
        if self.usage.requests > 0 {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "Provider usage: {} requests, {} tokens ({} prompt / {} completion)",
                self.usage.requests,
                self.usage.total_tokens(),
                self.usage.prompt_tokens,
                self.usage.completion_tokens
            );
        }
        out
    }

    /// Write the summary rendering next to nothing else.
    pub fn save_summary(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.render_summary()).map_err(|e| DatcullError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

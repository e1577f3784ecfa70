//! Comparison engine: cross-provider diffing of persisted reports.
//!
//! Consumes report artifacts only; never touches live pipeline state and
//! never mutates its inputs.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DatcullError, Result};
use crate::report::Report;

/// Comparison configuration.
#[derive(Debug, Clone)]
pub struct ComparisonConfig {
    /// Disagreement fraction (1 - agreement) at or above which an entry is
    /// flagged for manual review.
    pub disagreement_threshold: f64,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            disagreement_threshold: 0.5,
        }
    }
}

/// One provider's outcome for one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDecision {
    pub kept: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted_score: Option<f64>,
    pub reasoning: String,
}

/// Side-by-side view of one entry across providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryComparison {
    pub entry_id: String,
    pub entry_name: String,
    /// criterion -> provider -> score.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub scores: IndexMap<String, IndexMap<String, f64>>,
    /// provider -> decision.
    pub decisions: IndexMap<String, ProviderDecision>,
    /// Fraction of providers agreeing on the majority outcome.
    pub agreement: f64,
    /// Set when disagreement crosses the configured threshold.
    pub flagged: bool,
}

/// Structured diff of N reports over one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub providers: Vec<String>,
    pub collection_digest: String,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<EntryComparison>,
    pub mean_agreement: f64,
    pub flagged: usize,
}

/// Join reports by entry identifier and compute agreement per entry.
///
/// All reports must cover the same collection (identical digests) and come
/// from distinct providers.
pub fn compare(reports: &[Report], config: &ComparisonConfig) -> Result<Comparison> {
    if reports.len() < 2 {
        return Err(DatcullError::Config(
            "comparison needs at least two reports".to_string(),
        ));
    }
    let digest = &reports[0].collection_digest;
    for report in &reports[1..] {
        if &report.collection_digest != digest {
            return Err(DatcullError::Config(format!(
                "reports cover different collections: {} vs {}",
                digest, report.collection_digest
            )));
        }
    }
    let mut providers = Vec::new();
    for report in reports {
        if providers.contains(&report.provider) {
            return Err(DatcullError::Config(format!(
                "two reports from provider '{}'",
                report.provider
            )));
        }
        providers.push(report.provider.clone());
    }

    // Entry order follows the first report; stragglers from later reports
    // are appended in their own order.
    let mut entry_ids: IndexSet<&str> = IndexSet::new();
    for report in reports {
        for entry in &report.entries {
            entry_ids.insert(entry.decision.entry_id.as_str());
        }
    }

    let by_provider: Vec<HashMap<&str, &crate::report::EntryReport>> = reports
        .iter()
        .map(|r| {
            r.entries
                .iter()
                .map(|e| (e.decision.entry_id.as_str(), e))
                .collect()
        })
        .collect();

    let mut entries = Vec::with_capacity(entry_ids.len());
    for id in &entry_ids {
        let mut decisions = IndexMap::new();
        let mut scores: IndexMap<String, IndexMap<String, f64>> = IndexMap::new();
        let mut entry_name = String::new();

        for (report, lookup) in reports.iter().zip(&by_provider) {
            let Some(entry) = lookup.get(id) else {
                warn!(entry = %id, provider = %report.provider, "entry missing from report");
                continue;
            };
            if entry_name.is_empty() {
                entry_name = entry.decision.entry_name.clone();
            }
            decisions.insert(
                report.provider.clone(),
                ProviderDecision {
                    kept: entry.decision.kept,
                    weighted_score: entry.decision.weighted_score,
                    reasoning: entry.decision.reasoning.clone(),
                },
            );
            for (criterion, score) in &entry.decision.criterion_scores {
                scores
                    .entry(criterion.clone())
                    .or_default()
                    .insert(report.provider.clone(), *score);
            }
        }

        let present = decisions.len();
        let kept = decisions.values().filter(|d| d.kept).count();
        let agreement = if present == 0 {
            0.0
        } else {
            kept.max(present - kept) as f64 / present as f64
        };
        let flagged = (1.0 - agreement) >= config.disagreement_threshold;

        entries.push(EntryComparison {
            entry_id: id.to_string(),
            entry_name,
            scores,
            decisions,
            agreement,
            flagged,
        });
    }

    let mean_agreement = if entries.is_empty() {
        0.0
    } else {
        entries.iter().map(|e| e.agreement).sum::<f64>() / entries.len() as f64
    };
    let flagged = entries.iter().filter(|e| e.flagged).count();

    Ok(Comparison {
        providers,
        collection_digest: digest.clone(),
        generated_at: Utc::now(),
        entries,
        mean_agreement,
        flagged,
    })
}

impl Comparison {
    /// Render the plain-text side-by-side table.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Provider comparison: {}",
            self.providers.join(", ")
        );
        let _ = writeln!(
            out,
            "Entries: {}   mean agreement: {:.2}   flagged: {}",
            self.entries.len(),
            self.mean_agreement,
            self.flagged
        );
        let _ = writeln!(out, "{}", "=".repeat(60));

        for entry in &self.entries {
            let marker = if entry.flagged { "  [DISAGREEMENT]" } else { "" };
            let _ = writeln!(out, "{}{}", entry.entry_name, marker);

            let decision_line = entry
                .decisions
                .iter()
                .map(|(provider, d)| {
                    let outcome = if d.kept { "keep" } else { "exclude" };
                    match d.weighted_score {
                        Some(w) => format!("{provider}={outcome} ({w:.1})"),
                        None => format!("{provider}={outcome} (-)"),
                    }
                })
                .collect::<Vec<_>>()
                .join("  ");
            let _ = writeln!(
                out,
                "  decision: {}   agreement {:.2}",
                decision_line, entry.agreement
            );

            for (criterion, per_provider) in &entry.scores {
                let row = per_provider
                    .iter()
                    .map(|(provider, score)| format!("{provider} {score:.1}"))
                    .collect::<Vec<_>>()
                    .join("   ");
                let _ = writeln!(out, "    {criterion:<22} {row}");
            }
        }
        out
    }

    /// Save the structured diff as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            DatcullError::Persistence(format!("failed to create file '{}': {e}", path.display()))
        })?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self).map_err(|e| {
            DatcullError::Persistence(format!("failed to serialize comparison: {e}"))
        })
    }

    /// Save the plain-text table.
    pub fn save_table(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.render_table()).map_err(|e| DatcullError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

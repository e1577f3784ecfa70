//! Filter engine: merges provider scores and rule overrides into final
//! per-entry decisions and collection-level statistics.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::Collection;
use crate::criteria::Criterion;
use crate::provider::ScoreSet;
use crate::rules::{OverrideAction, OverrideScope, RuleKind, RuleOverride};

/// Filter configuration.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Weighted score at or above which an entry is kept by default.
    pub global_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            global_threshold: 5.0,
        }
    }
}

/// Final outcome for one entry, with full provenance.
///
/// Created once per run and never mutated; re-running the filter on the
/// same scores and overrides yields an identical decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Entry the decision is about.
    pub entry_id: String,
    /// Display name, for reports.
    pub entry_name: String,
    /// Whether the entry stays in the collection.
    pub kept: bool,
    /// Weight-normalized aggregate score, when computable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted_score: Option<f64>,
    /// Contributing per-criterion scores.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub criterion_scores: IndexMap<String, f64>,
    /// Overrides that targeted this entry, in rule priority order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<RuleOverride>,
    /// Why the entry was kept or excluded.
    pub reasoning: String,
    /// Set when the entry was excluded for lack of a usable score set.
    #[serde(default)]
    pub incomplete_evaluation: bool,
}

/// Per-criterion aggregate over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriterionStats {
    /// Mean score over entries with a usable score set.
    pub mean_score: f64,
    /// Kept entries for which this criterion contributed the most weight.
    pub deciding_count: usize,
    /// `deciding_count` over the number of kept entries.
    pub deciding_fraction: f64,
}

/// Collection-level statistics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterStats {
    pub total: usize,
    pub kept: usize,
    pub excluded: usize,
    /// Entries excluded because their evaluation was incomplete.
    pub incomplete: usize,
    /// Entries rescued by the low-score exception.
    pub low_score_exceptions: usize,
    /// Entries whose outcome was forced by any rule.
    pub overridden: usize,
    /// Per-criterion aggregates, in active-criteria order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub criterion_stats: IndexMap<String, CriterionStats>,
    /// Criterion that most often decided a kept entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strongest_criterion: Option<String>,
    /// Criterion that least often decided a kept entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weakest_criterion: Option<String>,
}

/// Combines score sets and rule overrides into decisions.
pub struct FilterEngine {
    config: FilterConfig,
}

impl FilterEngine {
    /// Engine with the default global threshold.
    pub fn new() -> Self {
        Self::with_config(FilterConfig::default())
    }

    /// Engine with custom configuration.
    pub fn with_config(config: FilterConfig) -> Self {
        Self { config }
    }

    /// The configured global inclusion threshold.
    pub fn global_threshold(&self) -> f64 {
        self.config.global_threshold
    }

    /// Produce exactly one decision per collection entry, in entry order.
    ///
    /// Pure with respect to its inputs: no randomness, no hidden state.
    pub fn decide(
        &self,
        collection: &Collection,
        criteria: &[Criterion],
        scores: &HashMap<String, ScoreSet>,
        overrides: &[RuleOverride],
    ) -> Vec<Decision> {
        let mut by_entry: HashMap<&str, Vec<&RuleOverride>> = HashMap::new();
        for ov in overrides {
            by_entry.entry(ov.entry_id.as_str()).or_default().push(ov);
        }

        collection
            .entries
            .iter()
            .map(|entry| {
                let entry_overrides = by_entry.get(entry.id.as_str());
                let effective = entry_overrides.and_then(|ovs| effective_override(ovs));
                let set = scores.get(&entry.id);
                let weighted = set.and_then(|s| s.weighted_score(criteria));

                let criterion_scores: IndexMap<String, f64> = set
                    .map(|s| {
                        criteria
                            .iter()
                            .filter_map(|c| s.get(&c.name).map(|v| (c.name.clone(), v.score)))
                            .collect()
                    })
                    .unwrap_or_default();

                let (kept, reasoning, incomplete) = match (weighted, effective) {
                    (Some(w), None) => {
                        let kept = w >= self.config.global_threshold;
                        let verb = if kept { "meets" } else { "is below" };
                        (
                            kept,
                            format!(
                                "Weighted score {:.2} {} threshold {:.2}",
                                w, verb, self.config.global_threshold
                            ),
                            false,
                        )
                    }
                    (Some(w), Some(ov)) => {
                        let kept = ov.action == OverrideAction::ForceKeep;
                        (
                            kept,
                            format!(
                                "Weighted score {:.2}; [{}] {}",
                                w,
                                ov.rule.name(),
                                ov.justification
                            ),
                            false,
                        )
                    }
                    (None, Some(ov)) => {
                        let kept = ov.action == OverrideAction::ForceKeep;
                        (
                            kept,
                            format!("[{}] {}", ov.rule.name(), ov.justification),
                            false,
                        )
                    }
                    (None, None) => {
                        let detail = match set {
                            Some(s) => match s.ensure_complete(criteria) {
                                Err(e) => e.to_string(),
                                Ok(()) => "no weight assigned to any scored criterion".to_string(),
                            },
                            None => "entry was never scored".to_string(),
                        };
                        debug!(entry = %entry.id, detail = %detail, "incomplete evaluation");
                        (
                            false,
                            format!("Incomplete evaluation ({detail}); excluded by default"),
                            true,
                        )
                    }
                };

                Decision {
                    entry_id: entry.id.clone(),
                    entry_name: entry.name.clone(),
                    kept,
                    weighted_score: weighted,
                    criterion_scores,
                    overrides: entry_overrides
                        .map(|ovs| ovs.iter().map(|o| (*o).clone()).collect())
                        .unwrap_or_default(),
                    reasoning,
                    incomplete_evaluation: incomplete,
                }
            })
            .collect()
    }

    /// Aggregate collection-level statistics over a run's decisions.
    pub fn aggregate(&self, decisions: &[Decision], criteria: &[Criterion]) -> FilterStats {
        let total = decisions.len();
        let kept = decisions.iter().filter(|d| d.kept).count();
        let incomplete = decisions.iter().filter(|d| d.incomplete_evaluation).count();
        let overridden = decisions
            .iter()
            .filter(|d| effective_override(&d.overrides.iter().collect::<Vec<_>>()).is_some())
            .count();
        let low_score_exceptions = decisions
            .iter()
            .filter(|d| {
                d.kept
                    && d.overrides
                        .iter()
                        .any(|o| o.rule == RuleKind::LowScoreException)
            })
            .count();

        let mut criterion_stats: IndexMap<String, CriterionStats> = criteria
            .iter()
            .map(|c| (c.name.clone(), CriterionStats::default()))
            .collect();

        // Mean scores.
        for criterion in criteria {
            let values: Vec<f64> = decisions
                .iter()
                .filter_map(|d| d.criterion_scores.get(&criterion.name).copied())
                .collect();
            if let Some(stats) = criterion_stats.get_mut(&criterion.name) {
                if !values.is_empty() {
                    stats.mean_score = values.iter().sum::<f64>() / values.len() as f64;
                }
            }
        }

        // Deciding factor: the criterion contributing the most weighted mass
        // to a kept entry's score.
        for decision in decisions.iter().filter(|d| d.kept) {
            let deciding = criteria
                .iter()
                .filter_map(|c| {
                    decision
                        .criterion_scores
                        .get(&c.name)
                        .map(|s| (c.name.as_str(), c.weight * s))
                })
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((name, _)) = deciding {
                if let Some(stats) = criterion_stats.get_mut(name) {
                    stats.deciding_count += 1;
                }
            }
        }
        if kept > 0 {
            for stats in criterion_stats.values_mut() {
                stats.deciding_fraction = stats.deciding_count as f64 / kept as f64;
            }
        }

        let strongest_criterion = criterion_stats
            .iter()
            .max_by(|(_, a), (_, b)| {
                a.deciding_fraction
                    .partial_cmp(&b.deciding_fraction)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(name, _)| name.clone());
        let weakest_criterion = criterion_stats
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.deciding_fraction
                    .partial_cmp(&b.deciding_fraction)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(name, _)| name.clone());

        FilterStats {
            total,
            kept,
            excluded: total - kept,
            incomplete,
            low_score_exceptions,
            overridden,
            criterion_stats,
            strongest_criterion,
            weakest_criterion,
        }
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick the override that governs an entry.
///
/// Entry-scoped overrides beat group-scoped ones; within a scope the
/// last-emitted override wins (later-registered supersedes earlier).
fn effective_override<'a>(overrides: &[&'a RuleOverride]) -> Option<&'a RuleOverride> {
    overrides
        .iter()
        .rev()
        .find(|o| o.scope == OverrideScope::Entry)
        .or_else(|| overrides.last())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    use crate::collection::{Entry, StructuralTags};
    use crate::provider::CriterionScore;

    fn criteria() -> Vec<Criterion> {
        vec![
            Criterion::new("metacritic", 0.6, 7.5, "Critical acclaim"),
            Criterion::new("historical", 0.4, 6.0, "Historical significance"),
        ]
    }

    fn make_collection(names: &[&str]) -> Collection {
        Collection {
            root_tag: "datafile".to_string(),
            root_attributes: IndexMap::new(),
            header: IndexMap::new(),
            entries: names
                .iter()
                .map(|name| Entry {
                    id: name.to_string(),
                    name: name.to_string(),
                    element: "game".to_string(),
                    tags: StructuralTags::default(),
                    attributes: IndexMap::new(),
                    fields: Vec::new(),
                })
                .collect(),
            digest: "sha256:test".to_string(),
        }
    }

    fn score_set(entry_id: &str, metacritic: f64, historical: f64) -> ScoreSet {
        let mut map = IndexMap::new();
        map.insert(
            "metacritic".to_string(),
            CriterionScore {
                score: metacritic,
                reasoning: None,
                confidence: None,
            },
        );
        map.insert(
            "historical".to_string(),
            CriterionScore {
                score: historical,
                reasoning: None,
                confidence: None,
            },
        );
        ScoreSet::complete(entry_id, "test", map)
    }

    fn scores_for(sets: Vec<ScoreSet>) -> HashMap<String, ScoreSet> {
        sets.into_iter().map(|s| (s.entry_id.clone(), s)).collect()
    }

    fn keep_override(entry_id: &str, rule: RuleKind) -> RuleOverride {
        RuleOverride {
            entry_id: entry_id.to_string(),
            action: OverrideAction::ForceKeep,
            rule,
            scope: rule.scope(),
            justification: format!("{} forced this entry", rule.name()),
        }
    }

    #[test]
    fn test_one_decision_per_entry() {
        let collection = make_collection(&["A", "B", "C"]);
        let scores = scores_for(vec![
            score_set("A", 8.0, 8.0),
            score_set("B", 2.0, 2.0),
            // C never scored.
        ]);

        let decisions = FilterEngine::new().decide(&collection, &criteria(), &scores, &[]);

        assert_eq!(decisions.len(), 3);
        assert!(decisions[0].kept);
        assert!(!decisions[1].kept);
        assert!(!decisions[2].kept);
        assert!(decisions[2].incomplete_evaluation);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let collection = make_collection(&["A", "B"]);
        let scores = scores_for(vec![score_set("A", 6.0, 4.0), score_set("B", 5.5, 4.5)]);
        let overrides = vec![keep_override("B", RuleKind::LowScoreException)];
        let engine = FilterEngine::new();

        let first = engine.decide(&collection, &criteria(), &scores, &overrides);
        let second = engine.decide(&collection, &criteria(), &scores, &overrides);

        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.kept, b.kept);
            assert_eq!(a.weighted_score, b.weighted_score);
            assert_eq!(a.reasoning, b.reasoning);
        }
    }

    #[test]
    fn test_override_replaces_baseline_and_cites_rule() {
        let collection = make_collection(&["A"]);
        let scores = scores_for(vec![score_set("A", 2.0, 2.0)]);
        let overrides = vec![keep_override("A", RuleKind::LowScoreException)];

        let decisions = FilterEngine::new().decide(&collection, &criteria(), &scores, &overrides);

        assert!(decisions[0].kept);
        assert!(decisions[0].reasoning.contains("low_score_exception"));
    }

    #[test]
    fn test_entry_scope_beats_group_scope() {
        let collection = make_collection(&["A"]);
        let scores = scores_for(vec![score_set("A", 8.0, 8.0)]);
        let overrides = vec![
            keep_override("A", RuleKind::MultiDisc), // group scope
            RuleOverride {
                entry_id: "A".to_string(),
                action: OverrideAction::ForceExclude,
                rule: RuleKind::HackDemotion,
                scope: OverrideScope::Entry,
                justification: "entry-level demotion".to_string(),
            },
        ];

        let decisions = FilterEngine::new().decide(&collection, &criteria(), &scores, &overrides);

        assert!(!decisions[0].kept);
        assert!(decisions[0].reasoning.contains("hack_demotion"));
        assert_eq!(decisions[0].overrides.len(), 2);
    }

    #[test]
    fn test_failed_score_set_degrades_to_incomplete() {
        let collection = make_collection(&["A"]);
        let scores = scores_for(vec![ScoreSet::failed("A", "test", "chunk failed")]);

        let decisions = FilterEngine::new().decide(&collection, &criteria(), &scores, &[]);

        assert!(!decisions[0].kept);
        assert!(decisions[0].incomplete_evaluation);
        assert!(decisions[0].reasoning.contains("Incomplete evaluation"));
    }

    #[test]
    fn test_aggregate_counts() {
        let collection = make_collection(&["A", "B", "C", "D"]);
        let scores = scores_for(vec![
            score_set("A", 9.0, 4.0),
            score_set("B", 2.0, 8.0),
            score_set("C", 2.0, 2.0),
        ]);
        let overrides = vec![keep_override("B", RuleKind::LowScoreException)];
        let engine = FilterEngine::new();

        let decisions = engine.decide(&collection, &criteria(), &scores, &overrides);
        let stats = engine.aggregate(&decisions, &criteria());

        assert_eq!(stats.total, 4);
        // A kept by score (0.6*9 + 0.4*4 = 7.0), B (weighted 4.4) kept by
        // override, C below threshold, D incomplete.
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.excluded, 2);
        assert_eq!(stats.incomplete, 1);
        assert_eq!(stats.low_score_exceptions, 1);
        assert_eq!(stats.overridden, 1);
        // A decided by metacritic (5.4 vs 1.6); B by historical (3.6 vs 2.4).
        assert_eq!(
            stats.criterion_stats.get("metacritic").unwrap().deciding_count,
            1
        );
        assert_eq!(
            stats.criterion_stats.get("historical").unwrap().deciding_count,
            1
        );
    }
}

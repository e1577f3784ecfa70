//! Special-case rules that override naive score-based decisions.
//!
//! Rules are pure functions over an [`EntryGroup`]: they inspect structural
//! tags and provider scores, and emit [`RuleOverride`] records consumed by
//! the filter engine. They never mutate entries. Evaluation runs in fixed
//! priority order per group; the first rule to claim a target wins and no
//! later rule is consulted for it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::{Collection, Entry, EntryGroup, Region};
use crate::criteria::Criterion;
use crate::provider::ScoreSet;

/// Forced outcome carried by an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    ForceKeep,
    ForceExclude,
}

/// Whether an override targets a single entry or a whole group.
///
/// Entry-level overrides beat group-level ones when the filter engine has
/// to pick between two overrides for the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideScope {
    Entry,
    Group,
}

/// The special-case rules, in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    MultiDisc,
    RegionalDedup,
    HackDemotion,
    LowScoreException,
}

impl RuleKind {
    /// Stable rule name cited in decision reasoning.
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::MultiDisc => "multi_disc",
            RuleKind::RegionalDedup => "regional_dedup",
            RuleKind::HackDemotion => "hack_demotion",
            RuleKind::LowScoreException => "low_score_exception",
        }
    }

    /// Scope at which the rule reasons.
    pub fn scope(&self) -> OverrideScope {
        match self {
            RuleKind::MultiDisc | RuleKind::RegionalDedup => OverrideScope::Group,
            RuleKind::HackDemotion | RuleKind::LowScoreException => OverrideScope::Entry,
        }
    }
}

/// A decision fragment emitted by a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOverride {
    /// Entry the override applies to.
    pub entry_id: String,
    /// Forced outcome.
    pub action: OverrideAction,
    /// Rule that produced the override.
    pub rule: RuleKind,
    /// Scope the rule reasoned at.
    pub scope: OverrideScope,
    /// Human-readable justification, recorded in the decision.
    pub justification: String,
}

/// Tunable rule parameters.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Region preference order for dedup tie-breaking.
    pub preferred_regions: Vec<Region>,
    /// `historical` score at or above which a regional variant escapes dedup.
    pub historical_exemption: f64,
    /// Multiplier over the `mods_hacks` threshold a hack must clear to stay.
    pub notable_multiplier: f64,
    /// Single-criterion score that rescues an entry below the global threshold.
    pub high_bar: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            preferred_regions: vec![Region::Usa, Region::Europe, Region::World, Region::Japan],
            historical_exemption: 8.0,
            notable_multiplier: 1.2,
            high_bar: 9.0,
        }
    }
}

/// Everything a rule may consult. Rules read, never write.
pub struct RuleContext<'a> {
    pub collection: &'a Collection,
    pub criteria: &'a [Criterion],
    pub global_threshold: f64,
    /// Score sets keyed by entry id.
    pub scores: &'a HashMap<String, ScoreSet>,
}

impl RuleContext<'_> {
    fn weighted(&self, entry: &Entry) -> Option<f64> {
        self.scores
            .get(&entry.id)
            .and_then(|set| set.weighted_score(self.criteria))
    }

    fn criterion_score(&self, entry: &Entry, criterion: &str) -> Option<f64> {
        self.scores
            .get(&entry.id)
            .and_then(|set| set.get(criterion))
            .map(|s| s.score)
    }
}

type RuleFn = fn(&RuleEngine, &EntryGroup, &RuleContext<'_>) -> Vec<RuleOverride>;

/// Fixed priority order of the rules.
const RULES: [(RuleKind, RuleFn); 4] = [
    (RuleKind::MultiDisc, RuleEngine::multi_disc),
    (RuleKind::RegionalDedup, RuleEngine::regional_dedup),
    (RuleKind::HackDemotion, RuleEngine::hack_demotion),
    (RuleKind::LowScoreException, RuleEngine::low_score_exception),
];

/// Applies the special-case rules to entry groups.
pub struct RuleEngine {
    config: RuleConfig,
}

impl RuleEngine {
    /// Engine with default parameters.
    pub fn new() -> Self {
        Self::with_config(RuleConfig::default())
    }

    /// Engine with custom parameters.
    pub fn with_config(config: RuleConfig) -> Self {
        Self { config }
    }

    /// Evaluate all rules over all groups.
    ///
    /// At most one override per entry: the first rule in priority order to
    /// produce one claims the entry.
    pub fn evaluate(&self, groups: &[EntryGroup], ctx: &RuleContext<'_>) -> Vec<RuleOverride> {
        let mut overrides = Vec::new();
        let mut claimed: HashSet<String> = HashSet::new();

        for group in groups {
            for (kind, rule) in RULES {
                for candidate in rule(self, group, ctx) {
                    debug_assert_eq!(candidate.rule, kind);
                    if claimed.insert(candidate.entry_id.clone()) {
                        debug!(
                            entry = %candidate.entry_id,
                            rule = kind.name(),
                            action = ?candidate.action,
                            "rule override"
                        );
                        overrides.push(candidate);
                    }
                }
            }
        }
        overrides
    }

    /// Multi-disc preservation: a title should not be split across
    /// included/excluded discs. If any disc of a set individually clears
    /// the global threshold, every disc is force-kept.
    fn multi_disc(&self, group: &EntryGroup, ctx: &RuleContext<'_>) -> Vec<RuleOverride> {
        let discs: Vec<&Entry> = group
            .members
            .iter()
            .map(|&i| &ctx.collection.entries[i])
            .filter(|e| e.tags.disc.is_some())
            .collect();

        let mut disc_numbers: Vec<u32> = discs.iter().filter_map(|e| e.tags.disc).collect();
        disc_numbers.sort_unstable();
        disc_numbers.dedup();
        if disc_numbers.len() < 2 {
            return Vec::new();
        }

        let qualifying = discs
            .iter()
            .find(|e| ctx.weighted(e).is_some_and(|w| w >= ctx.global_threshold));
        let Some(qualifying) = qualifying else {
            return Vec::new();
        };

        discs
            .iter()
            .map(|entry| RuleOverride {
                entry_id: entry.id.clone(),
                action: OverrideAction::ForceKeep,
                rule: RuleKind::MultiDisc,
                scope: OverrideScope::Group,
                justification: format!(
                    "Kept to complete the {}-disc set: '{}' qualifies on its own",
                    disc_numbers.len(),
                    qualifying.name
                ),
            })
            .collect()
    }

    /// Regional-variant dedup: keep only the best-scoring region of a
    /// release, unless a variant clears the historical exemption.
    fn regional_dedup(&self, group: &EntryGroup, ctx: &RuleContext<'_>) -> Vec<RuleOverride> {
        let candidates: Vec<&Entry> = group
            .members
            .iter()
            .map(|&i| &ctx.collection.entries[i])
            .filter(|e| e.tags.region.is_some() && e.tags.disc.is_none())
            .collect();

        let regions: HashSet<Region> = candidates.iter().filter_map(|e| e.tags.region).collect();
        if regions.len() < 2 {
            return Vec::new();
        }

        let contenders: Vec<(&Entry, f64)> = candidates
            .iter()
            .filter_map(|e| ctx.weighted(e).map(|w| (*e, w)))
            .collect();
        if contenders.len() < 2 {
            return Vec::new();
        }

        let best = contenders
            .iter()
            .min_by(|(a, wa), (b, wb)| {
                wb.partial_cmp(wa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| self.region_rank(a).cmp(&self.region_rank(b)))
            })
            .map(|(e, w)| (*e, *w));
        let Some((best, best_score)) = best else {
            return Vec::new();
        };

        contenders
            .iter()
            .filter(|(entry, _)| entry.id != best.id)
            .filter(|(entry, _)| {
                // Historical flag exempts a variant from dedup.
                !ctx.criterion_score(entry, "historical")
                    .is_some_and(|s| s >= self.config.historical_exemption)
            })
            .map(|(entry, score)| RuleOverride {
                entry_id: entry.id.clone(),
                action: OverrideAction::ForceExclude,
                rule: RuleKind::RegionalDedup,
                scope: OverrideScope::Group,
                justification: format!(
                    "Regional duplicate ({:.1}) superseded by '{}' ({:.1})",
                    score, best.name, best_score
                ),
            })
            .collect()
    }

    /// Hack/mod demotion: unofficial modifications are excluded unless the
    /// `mods_hacks` score clears its threshold by the notable multiplier.
    fn hack_demotion(&self, group: &EntryGroup, ctx: &RuleContext<'_>) -> Vec<RuleOverride> {
        let Some(mods_criterion) = ctx.criteria.iter().find(|c| c.name == "mods_hacks") else {
            // Without the criterion there is no margin to measure; demote all.
            return group
                .members
                .iter()
                .map(|&i| &ctx.collection.entries[i])
                .filter(|e| e.tags.is_mod_or_hack)
                .map(|entry| self.demote(entry, "mods_hacks criterion inactive"))
                .collect();
        };

        let notable_bar = mods_criterion.threshold * self.config.notable_multiplier;

        group
            .members
            .iter()
            .map(|&i| &ctx.collection.entries[i])
            .filter(|e| e.tags.is_mod_or_hack)
            .filter_map(|entry| {
                match ctx.criterion_score(entry, "mods_hacks") {
                    Some(score) if score >= notable_bar => None,
                    Some(score) => Some(self.demote(
                        entry,
                        &format!("mods_hacks {:.1} below notable bar {:.1}", score, notable_bar),
                    )),
                    None => Some(self.demote(entry, "no mods_hacks score")),
                }
            })
            .collect()
    }

    fn demote(&self, entry: &Entry, detail: &str) -> RuleOverride {
        RuleOverride {
            entry_id: entry.id.clone(),
            action: OverrideAction::ForceExclude,
            rule: RuleKind::HackDemotion,
            scope: OverrideScope::Entry,
            justification: format!("Unofficial modification excluded: {detail}"),
        }
    }

    /// Low-score exception: an entry below the global threshold is kept
    /// anyway when a single criterion exceeds the high bar.
    fn low_score_exception(&self, group: &EntryGroup, ctx: &RuleContext<'_>) -> Vec<RuleOverride> {
        group
            .members
            .iter()
            .map(|&i| &ctx.collection.entries[i])
            .filter_map(|entry| {
                let weighted = ctx.weighted(entry)?;
                if weighted >= ctx.global_threshold {
                    return None;
                }
                let set = ctx.scores.get(&entry.id)?;
                let standout = ctx
                    .criteria
                    .iter()
                    .filter_map(|c| set.get(&c.name).map(|s| (c.name.as_str(), s.score)))
                    .filter(|(_, score)| *score >= self.config.high_bar)
                    .max_by(|(_, a), (_, b)| {
                        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                    })?;
                Some(RuleOverride {
                    entry_id: entry.id.clone(),
                    action: OverrideAction::ForceKeep,
                    rule: RuleKind::LowScoreException,
                    scope: OverrideScope::Entry,
                    justification: format!(
                        "Weighted score {:.1} below threshold {:.1}, but {} scored {:.1} (high bar {:.1})",
                        weighted, ctx.global_threshold, standout.0, standout.1, self.config.high_bar
                    ),
                })
            })
            .collect()
    }

    fn region_rank(&self, entry: &Entry) -> usize {
        entry
            .tags
            .region
            .and_then(|r| self.config.preferred_regions.iter().position(|p| *p == r))
            .unwrap_or(usize::MAX)
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    use crate::collection::group_entries;
    use crate::provider::CriterionScore;

    fn criteria() -> Vec<Criterion> {
        vec![
            Criterion::new("metacritic", 0.5, 7.5, "Critical acclaim"),
            Criterion::new("historical", 0.5, 6.0, "Historical significance"),
            Criterion::new("mods_hacks", 0.0, 7.0, "Notable modifications"),
        ]
    }

    fn make_collection(names: &[&str]) -> Collection {
        let entries = names
            .iter()
            .map(|name| crate::collection::Entry {
                id: name.to_string(),
                name: name.to_string(),
                element: "game".to_string(),
                tags: crate::collection::detect_tags(name, None),
                attributes: IndexMap::new(),
                fields: Vec::new(),
            })
            .collect();
        Collection {
            root_tag: "datafile".to_string(),
            root_attributes: IndexMap::new(),
            header: IndexMap::new(),
            entries,
            digest: "sha256:test".to_string(),
        }
    }

    /// Build a complete score set; criteria not named get a neutral 5.0
    /// (which carries zero weight for `mods_hacks` in the test criteria).
    fn score_set(entry_id: &str, scores: &[(&str, f64)]) -> ScoreSet {
        let mut map = IndexMap::new();
        for (name, value) in scores {
            map.insert(
                name.to_string(),
                CriterionScore {
                    score: *value,
                    reasoning: None,
                    confidence: None,
                },
            );
        }
        for name in ["metacritic", "historical", "mods_hacks"] {
            map.entry(name.to_string()).or_insert(CriterionScore {
                score: 5.0,
                reasoning: None,
                confidence: None,
            });
        }
        ScoreSet::complete(entry_id, "test", map)
    }

    fn run_rules(
        collection: &Collection,
        scores: &[ScoreSet],
        config: RuleConfig,
    ) -> Vec<RuleOverride> {
        let groups = group_entries(collection);
        let by_id: HashMap<String, ScoreSet> = scores
            .iter()
            .map(|s| (s.entry_id.clone(), s.clone()))
            .collect();
        let criteria = criteria();
        let ctx = RuleContext {
            collection,
            criteria: &criteria,
            global_threshold: 5.0,
            scores: &by_id,
        };
        RuleEngine::with_config(config).evaluate(&groups, &ctx)
    }

    #[test]
    fn test_multi_disc_preserves_whole_set() {
        let collection = make_collection(&[
            "Chrono Saga (USA) (Disc 1)",
            "Chrono Saga (USA) (Disc 2)",
        ]);
        // Disc 1 above threshold, disc 2 below.
        let scores = vec![
            score_set("Chrono Saga (USA) (Disc 1)", &[("metacritic", 8.0), ("historical", 7.0)]),
            score_set("Chrono Saga (USA) (Disc 2)", &[("metacritic", 3.0), ("historical", 2.0)]),
        ];

        let overrides = run_rules(&collection, &scores, RuleConfig::default());

        assert_eq!(overrides.len(), 2);
        for ov in &overrides {
            assert_eq!(ov.action, OverrideAction::ForceKeep);
            assert_eq!(ov.rule, RuleKind::MultiDisc);
        }
    }

    #[test]
    fn test_multi_disc_ignored_when_no_disc_qualifies() {
        let collection = make_collection(&[
            "Chrono Saga (USA) (Disc 1)",
            "Chrono Saga (USA) (Disc 2)",
        ]);
        let scores = vec![
            score_set("Chrono Saga (USA) (Disc 1)", &[("metacritic", 3.0), ("historical", 2.0)]),
            score_set("Chrono Saga (USA) (Disc 2)", &[("metacritic", 3.0), ("historical", 2.0)]),
        ];

        let overrides = run_rules(&collection, &scores, RuleConfig::default());
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_regional_dedup_keeps_best_region() {
        let collection = make_collection(&[
            "Star Racer (USA)",
            "Star Racer (Europe)",
            "Star Racer (Japan)",
        ]);
        let scores = vec![
            score_set("Star Racer (USA)", &[("metacritic", 8.0), ("historical", 8.0)]),
            score_set("Star Racer (Europe)", &[("metacritic", 6.5), ("historical", 6.5)]),
            score_set("Star Racer (Japan)", &[("metacritic", 7.0), ("historical", 7.0)]),
        ];

        let overrides = run_rules(&collection, &scores, RuleConfig::default());

        let excluded: HashSet<&str> =
            overrides.iter().map(|o| o.entry_id.as_str()).collect();
        assert_eq!(
            excluded,
            HashSet::from(["Star Racer (Europe)", "Star Racer (Japan)"])
        );
        for ov in &overrides {
            assert_eq!(ov.action, OverrideAction::ForceExclude);
            assert_eq!(ov.rule, RuleKind::RegionalDedup);
        }
    }

    #[test]
    fn test_regional_dedup_historical_exemption() {
        let collection = make_collection(&["Star Racer (USA)", "Star Racer (Japan)"]);
        // The lower-scoring Japanese release is historically significant on
        // its own and escapes dedup.
        let scores = vec![
            score_set("Star Racer (USA)", &[("metacritic", 8.0), ("historical", 5.0)]),
            score_set("Star Racer (Japan)", &[("metacritic", 2.0), ("historical", 9.0)]),
        ];

        let overrides = run_rules(&collection, &scores, RuleConfig::default());
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_regional_dedup_tie_prefers_configured_region() {
        let collection = make_collection(&["Star Racer (Japan)", "Star Racer (USA)"]);
        let scores = vec![
            score_set("Star Racer (Japan)", &[("metacritic", 7.0), ("historical", 7.0)]),
            score_set("Star Racer (USA)", &[("metacritic", 7.0), ("historical", 7.0)]),
        ];

        let overrides = run_rules(&collection, &scores, RuleConfig::default());

        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].entry_id, "Star Racer (Japan)");
    }

    #[test]
    fn test_hack_demotion_excludes_ordinary_hack() {
        let collection = make_collection(&["Super Platformer (USA) (Hack)"]);
        let scores = vec![score_set(
            "Super Platformer (USA) (Hack)",
            &[("metacritic", 6.0), ("historical", 6.0), ("mods_hacks", 7.5)],
        )];

        // Notable bar is 7.0 * 1.2 = 8.4; 7.5 does not clear it.
        let overrides = run_rules(&collection, &scores, RuleConfig::default());

        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].action, OverrideAction::ForceExclude);
        assert_eq!(overrides[0].rule, RuleKind::HackDemotion);
    }

    #[test]
    fn test_hack_demotion_spares_notable_hack() {
        let collection = make_collection(&["Super Platformer (USA) (Hack)"]);
        let scores = vec![score_set(
            "Super Platformer (USA) (Hack)",
            &[("metacritic", 6.0), ("historical", 6.0), ("mods_hacks", 9.0)],
        )];

        let overrides = run_rules(&collection, &scores, RuleConfig::default());
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_low_score_exception() {
        let collection = make_collection(&["Obscure Pioneer (USA)"]);
        // Weighted (0.0 + 9.5) / 2 = 4.75 sits below the 5.0 threshold while
        // historical 9.5 clears the 9.0 high bar.
        let scores = vec![score_set(
            "Obscure Pioneer (USA)",
            &[("metacritic", 0.0), ("historical", 9.5)],
        )];

        let overrides = run_rules(&collection, &scores, RuleConfig::default());

        assert_eq!(overrides.len(), 1);
        let ov = &overrides[0];
        assert_eq!(ov.action, OverrideAction::ForceKeep);
        assert_eq!(ov.rule, RuleKind::LowScoreException);
        assert!(ov.justification.contains("historical"));
    }

    #[test]
    fn test_rule_precedence_first_match_wins() {
        // Disc 2 is below threshold but has a standout score; the multi-disc
        // rule claims it first and the low-score exception never fires.
        let collection = make_collection(&[
            "Chrono Saga (USA) (Disc 1)",
            "Chrono Saga (USA) (Disc 2)",
        ]);
        let scores = vec![
            score_set("Chrono Saga (USA) (Disc 1)", &[("metacritic", 8.0), ("historical", 8.0)]),
            score_set("Chrono Saga (USA) (Disc 2)", &[("metacritic", 0.0), ("historical", 9.5)]),
        ];

        let overrides = run_rules(&collection, &scores, RuleConfig::default());

        let disc2 = overrides
            .iter()
            .find(|o| o.entry_id == "Chrono Saga (USA) (Disc 2)")
            .unwrap();
        assert_eq!(disc2.rule, RuleKind::MultiDisc);
    }
}

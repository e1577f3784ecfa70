//! Main Datcull struct and public API.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::collection::{
    Collection, DatParser, OutputMetadata, ParserConfig, group_entries, write_filtered_file,
};
use crate::criteria::CriterionRegistry;
use crate::error::{DatcullError, Result};
use crate::filter::{FilterConfig, FilterEngine};
use crate::provider::{RandomProvider, ScoreProvider, ScoreSet};
use crate::report::{EntryReport, Report};
use crate::rules::{RuleConfig, RuleContext, RuleEngine};
use crate::run::{BatchRunner, CancelFlag, RunConfig, RunState};

/// Configuration for a curation run.
#[derive(Debug, Clone)]
pub struct DatcullConfig {
    /// Active criteria names; empty activates every registered criterion.
    pub active_criteria: Vec<String>,
    /// Weighted score at or above which entries are kept by default.
    pub global_threshold: f64,
    /// Entry names sampled into the provider context.
    pub context_sample_size: usize,
    /// Parser configuration.
    pub parser: ParserConfig,
    /// Batch run configuration.
    pub run: RunConfig,
    /// Rule engine parameters.
    pub rules: RuleConfig,
}

impl Default for DatcullConfig {
    fn default() -> Self {
        Self {
            active_criteria: Vec::new(),
            global_threshold: 5.0,
            context_sample_size: 50,
            parser: ParserConfig::default(),
            run: RunConfig::default(),
            rules: RuleConfig::default(),
        }
    }
}

/// Result of curating one collection.
#[derive(Debug, Clone)]
pub struct CurationOutput {
    /// The parsed source collection (needed to write filtered output).
    pub collection: Collection,
    /// Terminal state of the batch run.
    pub state: RunState,
    /// Full report; present only when the run completed.
    pub report: Option<Report>,
    /// Chunk that exhausted its retries, when the run failed.
    pub failed_chunk: Option<usize>,
    /// Entries left unscored by an incomplete run.
    pub unscored_entries: usize,
}

/// The curation pipeline: parse, score, apply rules, decide, report.
///
/// # Example
///
/// ```no_run
/// use datcull::{Datcull, RandomProvider};
///
/// let datcull = Datcull::new().with_provider(RandomProvider::with_seed(42));
/// let output = datcull.curate("games.dat").unwrap();
///
/// if let Some(report) = &output.report {
///     println!("{}", report.render_summary());
/// }
/// ```
pub struct Datcull {
    config: DatcullConfig,
    registry: CriterionRegistry,
    parser: DatParser,
    provider: Arc<dyn ScoreProvider>,
}

impl Datcull {
    /// Pipeline with default configuration and the deterministic random
    /// provider (free, no credentials).
    pub fn new() -> Self {
        Self::with_config(DatcullConfig::default())
    }

    /// Pipeline with custom configuration.
    pub fn with_config(config: DatcullConfig) -> Self {
        let parser = DatParser::with_config(config.parser.clone());
        Self {
            config,
            registry: CriterionRegistry::builtin(),
            parser,
            provider: Arc::new(RandomProvider::new()),
        }
    }

    /// Use a specific scoring provider.
    pub fn with_provider(mut self, provider: impl ScoreProvider + 'static) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    /// Use a custom criterion registry.
    pub fn with_registry(mut self, registry: CriterionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Curate a collection file end to end.
    pub fn curate(&self, path: impl AsRef<Path>) -> Result<CurationOutput> {
        self.curate_with_cancel(path, &CancelFlag::new())
    }

    /// Curate with a cancellation handle honored at chunk boundaries.
    pub fn curate_with_cancel(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancelFlag,
    ) -> Result<CurationOutput> {
        let collection = self.parser.parse_file(path)?;
        let criteria = self.registry.select(&self.config.active_criteria)?;
        let context = collection.context(self.config.context_sample_size);

        let runner = BatchRunner::new(self.provider.as_ref(), self.config.run.clone());
        let outcome = runner.run(&collection, &criteria, Some(&context), cancel)?;

        if outcome.state != RunState::Completed {
            return Ok(CurationOutput {
                collection,
                state: outcome.state,
                report: None,
                failed_chunk: outcome.failed_chunk,
                unscored_entries: outcome.unscored_entries,
            });
        }

        let scores: HashMap<String, ScoreSet> = outcome
            .score_sets
            .into_iter()
            .map(|s| (s.entry_id.clone(), s))
            .collect();

        let groups = group_entries(&collection);
        let rule_engine = RuleEngine::with_config(self.config.rules.clone());
        let overrides = rule_engine.evaluate(
            &groups,
            &RuleContext {
                collection: &collection,
                criteria: &criteria,
                global_threshold: self.config.global_threshold,
                scores: &scores,
            },
        );

        let filter = FilterEngine::with_config(FilterConfig {
            global_threshold: self.config.global_threshold,
        });
        let decisions = filter.decide(&collection, &criteria, &scores, &overrides);
        let stats = filter.aggregate(&decisions, &criteria);

        info!(
            kept = stats.kept,
            excluded = stats.excluded,
            overridden = stats.overridden,
            "curation decisions ready"
        );

        let mut scores = scores;
        let entries = decisions
            .into_iter()
            .map(|decision| {
                let score_set = scores.remove(&decision.entry_id);
                EntryReport {
                    decision,
                    score_set,
                }
            })
            .collect();

        let report = Report {
            provider: self.provider.name().to_string(),
            collection_digest: collection.digest.clone(),
            collection_name: collection.header.get("name").cloned(),
            generated_at: Utc::now(),
            criteria,
            global_threshold: self.config.global_threshold,
            entries,
            stats,
            usage: self.provider.usage(),
        };

        Ok(CurationOutput {
            collection,
            state: RunState::Completed,
            report: Some(report),
            failed_chunk: None,
            unscored_entries: 0,
        })
    }

    /// Write the filtered collection document for a completed run.
    pub fn export_filtered(&self, output: &CurationOutput, path: impl AsRef<Path>) -> Result<()> {
        let report = output.report.as_ref().ok_or_else(|| {
            DatcullError::Config("cannot export: the run did not complete".to_string())
        })?;
        let kept_ids: HashSet<String> = report
            .kept_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        let metadata = OutputMetadata {
            provider: report.provider.clone(),
            criteria: report.criteria.iter().map(|c| c.name.clone()).collect(),
            original_count: output.collection.len(),
            kept_count: report.stats.kept,
            timestamp: report.generated_at,
        };
        write_filtered_file(&output.collection, &kept_ids, &metadata, path)
    }
}

impl Default for Datcull {
    fn default() -> Self {
        Self::new()
    }
}

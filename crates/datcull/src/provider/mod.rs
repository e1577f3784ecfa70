//! Scoring providers: the capability contract plus its variants.
//!
//! A provider scores a batch of entries against the active criteria and
//! returns exactly one [`ScoreSet`] per entry, in input order, even on
//! partial internal failure (a failed score set is marked, never omitted).
//!
//! # Variants
//!
//! - [`RandomProvider`] - seeded pseudo-random scores, no I/O, free; used
//!   for pipeline testing.
//! - [`LlmProvider`] - one HTTP request per chunk against a chat-completion
//!   API, parsing structured score+reasoning output.

mod llm;
mod prompts;
mod random;

pub use llm::{LlmConfig, LlmProvider};
pub use random::RandomProvider;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::collection::{CollectionContext, Entry};
use crate::criteria::Criterion;
use crate::error::Result;

/// One criterion's score for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    /// Score on the 0-10 scale.
    pub score: f64,

    /// Free-text justification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Provider confidence in the score (0.0-1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Completion status of a score set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScoreSetStatus {
    /// Every requested criterion has exactly one score.
    Complete,
    /// The provider could not score this entry; `detail` says why.
    Failed { detail: String },
}

/// Per-(entry, provider) scores and reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSet {
    /// Entry this score set belongs to.
    pub entry_id: String,

    /// Provider that produced it.
    pub provider: String,

    /// Criterion name to score, in the order criteria were requested.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub scores: IndexMap<String, CriterionScore>,

    /// Whether the set is usable.
    #[serde(flatten)]
    pub status: ScoreSetStatus,
}

impl ScoreSet {
    /// A complete score set.
    pub fn complete(
        entry_id: impl Into<String>,
        provider: impl Into<String>,
        scores: IndexMap<String, CriterionScore>,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            provider: provider.into(),
            scores,
            status: ScoreSetStatus::Complete,
        }
    }

    /// A failed score set carrying the failure detail.
    pub fn failed(
        entry_id: impl Into<String>,
        provider: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            provider: provider.into(),
            scores: IndexMap::new(),
            status: ScoreSetStatus::Failed {
                detail: detail.into(),
            },
        }
    }

    /// Whether this set is marked failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.status, ScoreSetStatus::Failed { .. })
    }

    /// Score for one criterion.
    pub fn get(&self, criterion: &str) -> Option<&CriterionScore> {
        self.scores.get(criterion)
    }

    /// Verify the set covers every requested criterion.
    ///
    /// Returns [`DatcullError::IncompleteScoreSet`] naming the first missing
    /// criterion; the filter engine surfaces this per entry instead of
    /// aborting the run.
    pub fn ensure_complete(&self, criteria: &[Criterion]) -> Result<()> {
        if let ScoreSetStatus::Failed { detail } = &self.status {
            return Err(crate::error::DatcullError::ProviderFormat(detail.clone()));
        }
        for criterion in criteria {
            if !self.scores.contains_key(&criterion.name) {
                return Err(crate::error::DatcullError::IncompleteScoreSet {
                    entry: self.entry_id.clone(),
                    criterion: criterion.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Weight-normalized aggregate over the given criteria.
    ///
    /// `None` when the set is failed or any requested criterion is missing,
    /// so callers can route the entry down the incomplete-evaluation path.
    pub fn weighted_score(&self, criteria: &[Criterion]) -> Option<f64> {
        if self.is_failed() || criteria.is_empty() {
            return None;
        }
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for criterion in criteria {
            let score = self.scores.get(&criterion.name)?;
            weighted += criterion.weight * score.score;
            total_weight += criterion.weight;
        }
        if total_weight > 0.0 {
            Some(weighted / total_weight)
        } else {
            None
        }
    }
}

/// Provider usage counters kept for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUsage {
    /// Requests issued.
    pub requests: u64,
    /// Prompt tokens consumed.
    pub prompt_tokens: u64,
    /// Completion tokens consumed.
    pub completion_tokens: u64,
}

impl ProviderUsage {
    /// Total tokens in both directions.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Capability contract for scoring providers.
///
/// Implementations must be thread-safe (Send + Sync) so independent runs
/// can share one provider instance. Providers are stateless across calls
/// except for usage counters.
pub trait ScoreProvider: Send + Sync {
    /// Score a batch of entries against a set of criteria.
    ///
    /// Must return exactly one [`ScoreSet`] per input entry, in input
    /// order. An entry the provider could not score gets a failed set, not
    /// a gap: callers never reconcile length mismatches. Whole-call errors
    /// ([`DatcullError::ProviderTransport`] and friends) are reserved for
    /// failures affecting the entire chunk.
    fn score(
        &self,
        entries: &[Entry],
        criteria: &[Criterion],
        context: Option<&CollectionContext>,
    ) -> Result<Vec<ScoreSet>>;

    /// Name of this provider (for reports and checkpoint keying).
    fn name(&self) -> &str;

    /// Usage counters accumulated so far.
    fn usage(&self) -> ProviderUsage {
        ProviderUsage::default()
    }
}

//! Criterion registry: the evaluation axes, their weights and thresholds.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{DatcullError, Result};

/// A named evaluation axis with a weight and an inclusion threshold.
///
/// Weights need not sum to 1; the filter engine normalizes at aggregation
/// time. Scores and thresholds live on a 0-10 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Name the criterion is referenced by everywhere else.
    pub name: String,
    /// Non-negative aggregation weight.
    pub weight: f64,
    /// Per-criterion inclusion threshold (0-10).
    pub threshold: f64,
    /// What the axis measures, used in scoring prompts.
    pub description: String,
}

impl Criterion {
    /// Create a criterion definition.
    pub fn new(
        name: impl Into<String>,
        weight: f64,
        threshold: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            weight: weight.max(0.0),
            threshold: threshold.clamp(0.0, 10.0),
            description: description.into(),
        }
    }
}

/// Built-in criterion definitions.
static BUILTIN: Lazy<Vec<Criterion>> = Lazy::new(|| {
    vec![
        Criterion::new(
            "metacritic",
            0.17,
            7.5,
            "Critical acclaim and review scores",
        ),
        Criterion::new(
            "historical",
            0.17,
            6.0,
            "Historical significance and innovation",
        ),
        Criterion::new(
            "v_list",
            0.17,
            5.0,
            "Inclusion in V's recommended games list",
        ),
        Criterion::new(
            "console_significance",
            0.17,
            6.0,
            "Significance to the console's identity",
        ),
        Criterion::new(
            "mods_hacks",
            0.16,
            7.0,
            "Notable mods, hacks, or unofficial translations",
        ),
        Criterion::new(
            "hidden_gems",
            0.16,
            6.5,
            "Community-recognized hidden gems from forums",
        ),
    ]
});

/// Registry of criterion definitions with active-subset selection.
#[derive(Debug, Clone)]
pub struct CriterionRegistry {
    criteria: Vec<Criterion>,
}

impl CriterionRegistry {
    /// Registry seeded with the built-in definitions.
    pub fn builtin() -> Self {
        Self {
            criteria: BUILTIN.clone(),
        }
    }

    /// Registry with an explicit set of definitions.
    pub fn with_criteria(criteria: Vec<Criterion>) -> Self {
        Self { criteria }
    }

    /// Register an additional definition, replacing any same-named one.
    pub fn register(&mut self, criterion: Criterion) {
        match self.criteria.iter_mut().find(|c| c.name == criterion.name) {
            Some(existing) => *existing = criterion,
            None => self.criteria.push(criterion),
        }
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.name == name)
    }

    /// All registered definitions, in registration order.
    pub fn all(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Override the threshold of a registered criterion.
    pub fn set_threshold(&mut self, name: &str, threshold: f64) -> Result<()> {
        let criterion = self
            .criteria
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| DatcullError::UnknownCriterion(name.to_string()))?;
        criterion.threshold = threshold.clamp(0.0, 10.0);
        Ok(())
    }

    /// Override the weight of a registered criterion.
    pub fn set_weight(&mut self, name: &str, weight: f64) -> Result<()> {
        let criterion = self
            .criteria
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| DatcullError::UnknownCriterion(name.to_string()))?;
        criterion.weight = weight.max(0.0);
        Ok(())
    }

    /// Resolve the active criteria for a run.
    ///
    /// An empty selection activates every registered criterion. Order
    /// follows the selection; unknown names fail with
    /// [`DatcullError::UnknownCriterion`].
    pub fn select(&self, names: &[String]) -> Result<Vec<Criterion>> {
        if names.is_empty() {
            return Ok(self.criteria.clone());
        }
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| DatcullError::UnknownCriterion(name.clone()))
            })
            .collect()
    }
}

impl Default for CriterionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

//! LLM-backed scoring provider over a chat-completion HTTP API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::collection::{CollectionContext, Entry};
use crate::criteria::Criterion;
use crate::error::{DatcullError, Result};

use super::prompts;
use super::{CriterionScore, ProviderUsage, ScoreProvider, ScoreSet};

/// Default API endpoint (any chat-completion compatible server works).
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Configuration for the LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat-completion endpoint URL.
    pub endpoint: String,
    /// Model to request.
    pub model: String,
    /// Maximum tokens in the response.
    pub max_tokens: usize,
    /// Sampling temperature (0.0-1.0).
    pub temperature: f64,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Provider name used in reports and checkpoint keys.
    pub name: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            timeout_secs: 60,
            name: "llm".to_string(),
        }
    }
}

/// Scoring provider that asks a chat-completion API to evaluate entries.
///
/// The API key is held in memory only; it is never logged and never
/// written into reports or checkpoints.
pub struct LlmProvider {
    client: Client,
    api_key: String,
    config: LlmConfig,
    requests: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl LlmProvider {
    /// Create a provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(api_key, LlmConfig::default())
    }

    /// Create a provider with custom configuration.
    pub fn with_config(api_key: impl Into<String>, config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DatcullError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
            requests: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        })
    }

    /// Create from the `DATCULL_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("DATCULL_API_KEY").map_err(|_| {
            DatcullError::Config("DATCULL_API_KEY environment variable not set".to_string())
        })?;
        Self::new(api_key)
    }

    /// Send one chat request and return the assistant text.
    fn send_request(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [
                { "role": "system", "content": prompts::system_prompt() },
                { "role": "user", "content": prompt }
            ]
        });

        self.requests.fetch_add(1, Ordering::Relaxed);

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DatcullError::ProviderTransport(format!("request timed out: {e}"))
                } else {
                    DatcullError::ProviderTransport(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(DatcullError::ProviderRateLimit(format!(
                "API returned 429 for model {}",
                self.config.model
            )));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DatcullError::Config(format!(
                "API rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(DatcullError::ProviderTransport(format!(
                "API error ({status}): {text}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| DatcullError::ProviderFormat(format!("unreadable API response: {e}")))?;

        if let Some(usage) = parsed.usage {
            self.prompt_tokens
                .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
            self.completion_tokens
                .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        }

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DatcullError::ProviderFormat("no choices in API response".to_string()))
    }

    /// Extract the JSON payload from a response, tolerating markdown fences.
    fn extract_json<'a>(&self, response: &'a str) -> &'a str {
        if response.contains("```json") {
            response
                .split("```json")
                .nth(1)
                .and_then(|s| s.split("```").next())
                .map(|s| s.trim())
                .unwrap_or(response)
        } else if response.contains("```") {
            response
                .split("```")
                .nth(1)
                .map(|s| s.trim())
                .unwrap_or(response)
        } else {
            response.trim()
        }
    }

    /// Align parsed evaluations with the requested entries.
    ///
    /// Output order follows the input entries. Entries the model skipped
    /// get failed sets; entries it invented are dropped with a warning.
    fn align(
        &self,
        entries: &[Entry],
        criteria: &[Criterion],
        evaluations: Vec<EntryEvaluation>,
    ) -> Vec<ScoreSet> {
        let mut by_name: HashMap<&str, &EntryEvaluation> = HashMap::new();
        for evaluation in &evaluations {
            if by_name.insert(evaluation.name.as_str(), evaluation).is_some() {
                warn!(entry = %evaluation.name, "provider returned duplicate evaluation");
            }
        }
        for evaluation in &evaluations {
            if !entries.iter().any(|e| e.name == evaluation.name) {
                warn!(entry = %evaluation.name, "provider evaluated an entry it was not asked about");
            }
        }

        entries
            .iter()
            .map(|entry| match by_name.get(entry.name.as_str()) {
                Some(evaluation) => self.to_score_set(entry, criteria, evaluation),
                None => ScoreSet::failed(
                    entry.id.clone(),
                    self.name(),
                    "provider response omitted this entry",
                ),
            })
            .collect()
    }

    fn to_score_set(
        &self,
        entry: &Entry,
        criteria: &[Criterion],
        evaluation: &EntryEvaluation,
    ) -> ScoreSet {
        let mut scores = IndexMap::new();
        for criterion in criteria {
            match evaluation.scores.get(&criterion.name) {
                Some(parsed) => {
                    scores.insert(
                        criterion.name.clone(),
                        CriterionScore {
                            score: parsed.score.clamp(0.0, 10.0),
                            reasoning: parsed.reasoning.clone(),
                            confidence: parsed.confidence,
                        },
                    );
                }
                None => {
                    return ScoreSet::failed(
                        entry.id.clone(),
                        self.name(),
                        format!("provider response missing criterion '{}'", criterion.name),
                    );
                }
            }
        }
        ScoreSet::complete(entry.id.clone(), self.name(), scores)
    }
}

impl ScoreProvider for LlmProvider {
    fn score(
        &self,
        entries: &[Entry],
        criteria: &[Criterion],
        context: Option<&CollectionContext>,
    ) -> Result<Vec<ScoreSet>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = prompts::scoring_prompt(entries, criteria, context);
        debug!(entries = entries.len(), "sending scoring request");
        let response = self.send_request(&prompt)?;

        let payload = self.extract_json(&response);
        let evaluations: Vec<EntryEvaluation> = serde_json::from_str(payload).map_err(|e| {
            DatcullError::ProviderFormat(format!("response did not match score schema: {e}"))
        })?;

        Ok(self.align(entries, criteria, evaluations))
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn usage(&self) -> ProviderUsage {
        ProviderUsage {
            requests: self.requests.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Chat-completion API response structure.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// One game's evaluation as parsed from the model output.
#[derive(Debug, Deserialize)]
struct EntryEvaluation {
    name: String,
    #[serde(default)]
    scores: HashMap<String, ParsedScore>,
}

#[derive(Debug, Deserialize)]
struct ParsedScore {
    score: f64,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

//! Batch run controller: chunking, retry/backoff, checkpointing, resume.
//!
//! Chunks are processed strictly sequentially: the checkpoint is persisted
//! only after a chunk's provider call fully resolves, so a crash loses at
//! most the in-flight chunk. Cancellation is honored before starting the
//! next chunk, never mid-chunk, keeping the checkpoint consistent.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collection::{Collection, CollectionContext};
use crate::criteria::Criterion;
use crate::error::{DatcullError, Result};
use crate::provider::{ScoreProvider, ScoreSet};

/// Lifecycle of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
    Failed,
    Paused,
}

/// Batch run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Entries per provider call.
    pub batch_size: usize,
    /// Attempts per chunk before the run fails (first try included).
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base: Duration,
    /// Optional fixed delay between chunks, independent of failure handling.
    pub chunk_delay: Option<Duration>,
    /// Resume from a matching checkpoint instead of starting over.
    pub resume: bool,
    /// Directory holding checkpoint files.
    pub checkpoint_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            chunk_delay: None,
            resume: false,
            checkpoint_dir: PathBuf::from(".datcull"),
        }
    }
}

/// Cooperative cancellation handle, shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next chunk boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Persisted progress of one batch run.
///
/// Keyed by (collection digest, provider name, batch size); written only by
/// the controller, read once at run start for resume, and deleted on clean
/// completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub collection_digest: String,
    pub provider: String,
    pub batch_size: usize,
    pub total_chunks: usize,
    /// Chunks whose score sets are recorded, including format-degraded ones.
    pub completed_chunks: BTreeSet<usize>,
    /// Chunks degraded to failed score sets by a format error.
    pub degraded_chunks: BTreeSet<usize>,
    /// Accumulated score sets, in scoring order.
    pub score_sets: Vec<ScoreSet>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunCheckpoint {
    fn new(digest: &str, provider: &str, batch_size: usize, total_chunks: usize) -> Self {
        let now = Utc::now();
        Self {
            collection_digest: digest.to_string(),
            provider: provider.to_string(),
            batch_size,
            total_chunks,
            completed_chunks: BTreeSet::new(),
            degraded_chunks: BTreeSet::new(),
            score_sets: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Checkpoint file path for a (collection, provider, batch size) key.
    pub fn path_for(dir: &Path, digest: &str, provider: &str, batch_size: usize) -> PathBuf {
        let digest_part: String = digest
            .trim_start_matches("sha256:")
            .chars()
            .take(16)
            .collect();
        let provider_part: String = provider
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        dir.join(format!(
            "{digest_part}-{provider_part}-b{batch_size}.checkpoint.json"
        ))
    }

    fn matches(&self, digest: &str, provider: &str, batch_size: usize) -> bool {
        self.collection_digest == digest
            && self.provider == provider
            && self.batch_size == batch_size
    }

    /// Save the checkpoint to a JSON file.
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
            .map_err(|e| DatcullError::Persistence(format!("failed to serialize checkpoint: {e}")))
    }

    /// Load a checkpoint from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            DatcullError::Persistence(format!("failed to open file '{}': {e}", path.display()))
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| {
            DatcullError::Persistence(format!(
                "failed to parse checkpoint '{}': {e}",
                path.display()
            ))
        })
    }
}

/// Result of driving a provider over a whole collection.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Terminal state of the run.
    pub state: RunState,
    /// Score sets in collection entry order. Complete only when the state
    /// is `Completed`; partial otherwise.
    pub score_sets: Vec<ScoreSet>,
    /// Total chunks in the run.
    pub chunks_total: usize,
    /// Chunks recorded in the checkpoint.
    pub chunks_completed: usize,
    /// Chunk that exhausted its retry budget, when the run failed.
    pub failed_chunk: Option<usize>,
    /// Entries without a recorded score set.
    pub unscored_entries: usize,
}

/// Drives a scoring provider over a collection in resumable chunks.
pub struct BatchRunner<'a> {
    provider: &'a dyn ScoreProvider,
    config: RunConfig,
}

impl<'a> BatchRunner<'a> {
    /// Create a runner for a provider.
    pub fn new(provider: &'a dyn ScoreProvider, config: RunConfig) -> Self {
        Self { provider, config }
    }

    /// Run the provider over the collection.
    ///
    /// Transient provider errors are retried with exponential backoff up to
    /// the attempt budget; exhaustion fails the run with the checkpoint
    /// preserved. Format errors degrade the chunk and processing continues.
    /// Fatal errors propagate as `Err`.
    pub fn run(
        &self,
        collection: &Collection,
        criteria: &[Criterion],
        context: Option<&CollectionContext>,
        cancel: &CancelFlag,
    ) -> Result<RunOutcome> {
        if self.config.batch_size == 0 {
            return Err(DatcullError::Config("batch_size must be at least 1".into()));
        }

        let entries = &collection.entries;
        let total_chunks = entries.len().div_ceil(self.config.batch_size);
        let checkpoint_path = RunCheckpoint::path_for(
            &self.config.checkpoint_dir,
            &collection.digest,
            self.provider.name(),
            self.config.batch_size,
        );

        let mut checkpoint = self.load_or_create(&checkpoint_path, collection, total_chunks)?;

        info!(
            provider = self.provider.name(),
            entries = entries.len(),
            chunks = total_chunks,
            resumed = !checkpoint.completed_chunks.is_empty(),
            "starting batch run"
        );

        let mut state = RunState::Running;
        let mut failed_chunk = None;

        for (chunk_idx, chunk) in entries.chunks(self.config.batch_size).enumerate() {
            if checkpoint.completed_chunks.contains(&chunk_idx) {
                debug!(chunk = chunk_idx, "chunk already scored, skipping");
                continue;
            }
            if cancel.is_cancelled() {
                info!(chunk = chunk_idx, "cancellation requested, pausing run");
                state = RunState::Paused;
                break;
            }

            match self.score_chunk(chunk_idx, chunk, criteria, context)? {
                ChunkResult::Scored(sets) => {
                    checkpoint.score_sets.extend(sets);
                    checkpoint.completed_chunks.insert(chunk_idx);
                    checkpoint.updated_at = Utc::now();
                    checkpoint.save(&checkpoint_path)?;
                }
                ChunkResult::Degraded(sets, detail) => {
                    warn!(chunk = chunk_idx, detail = %detail, "chunk degraded to failed score sets");
                    checkpoint.score_sets.extend(sets);
                    checkpoint.completed_chunks.insert(chunk_idx);
                    checkpoint.degraded_chunks.insert(chunk_idx);
                    checkpoint.updated_at = Utc::now();
                    checkpoint.save(&checkpoint_path)?;
                }
                ChunkResult::Exhausted => {
                    state = RunState::Failed;
                    failed_chunk = Some(chunk_idx);
                    break;
                }
            }

            if let Some(delay) = self.config.chunk_delay {
                if checkpoint.completed_chunks.len() < total_chunks {
                    std::thread::sleep(delay);
                }
            }
        }

        if state == RunState::Running {
            state = RunState::Completed;
        }

        let chunks_completed = checkpoint.completed_chunks.len();
        let by_id: HashMap<&str, &ScoreSet> = checkpoint
            .score_sets
            .iter()
            .map(|s| (s.entry_id.as_str(), s))
            .collect();
        let score_sets: Vec<ScoreSet> = entries
            .iter()
            .filter_map(|e| by_id.get(e.id.as_str()).map(|s| (*s).clone()))
            .collect();
        let unscored_entries = entries.len() - score_sets.len();

        match state {
            RunState::Completed => {
                if let Err(e) = fs::remove_file(&checkpoint_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(error = %e, "could not remove finished checkpoint");
                    }
                }
                info!(
                    scored = score_sets.len(),
                    degraded = checkpoint.degraded_chunks.len(),
                    "batch run completed"
                );
            }
            RunState::Failed => {
                warn!(
                    failed_chunk = failed_chunk.unwrap_or_default(),
                    unscored = unscored_entries,
                    "batch run failed; checkpoint preserved for resume"
                );
            }
            RunState::Paused => {
                info!(unscored = unscored_entries, "batch run paused");
            }
            _ => {}
        }

        Ok(RunOutcome {
            state,
            score_sets,
            chunks_total: total_chunks,
            chunks_completed,
            failed_chunk,
            unscored_entries,
        })
    }

    fn load_or_create(
        &self,
        path: &Path,
        collection: &Collection,
        total_chunks: usize,
    ) -> Result<RunCheckpoint> {
        if self.config.resume && path.exists() {
            let checkpoint = RunCheckpoint::load(path)?;
            if checkpoint.matches(
                &collection.digest,
                self.provider.name(),
                self.config.batch_size,
            ) {
                info!(
                    completed = checkpoint.completed_chunks.len(),
                    total = checkpoint.total_chunks,
                    "resuming from checkpoint"
                );
                return Ok(checkpoint);
            }
            warn!(
                path = %path.display(),
                "checkpoint does not match this run; starting over"
            );
        }
        Ok(RunCheckpoint::new(
            &collection.digest,
            self.provider.name(),
            self.config.batch_size,
            total_chunks,
        ))
    }

    /// Score one chunk, absorbing transient errors up to the attempt budget.
    fn score_chunk(
        &self,
        chunk_idx: usize,
        chunk: &[crate::collection::Entry],
        criteria: &[Criterion],
        context: Option<&CollectionContext>,
    ) -> Result<ChunkResult> {
        for attempt in 1..=self.config.max_attempts {
            match self.provider.score(chunk, criteria, context) {
                Ok(sets) => {
                    let sets = self.enforce_contract(chunk, sets);
                    debug!(chunk = chunk_idx, attempt, "chunk scored");
                    return Ok(ChunkResult::Scored(sets));
                }
                Err(e) if e.is_retryable() => {
                    if attempt == self.config.max_attempts {
                        warn!(chunk = chunk_idx, error = %e, "retry budget exhausted");
                        return Ok(ChunkResult::Exhausted);
                    }
                    let backoff = self.config.backoff_base * 2u32.pow(attempt - 1);
                    warn!(
                        chunk = chunk_idx,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient provider error, backing off"
                    );
                    std::thread::sleep(backoff);
                }
                Err(DatcullError::ProviderFormat(detail)) => {
                    // Retrying a malformed-response condition rarely helps.
                    let sets = chunk
                        .iter()
                        .map(|e| {
                            ScoreSet::failed(e.id.clone(), self.provider.name(), detail.clone())
                        })
                        .collect();
                    return Ok(ChunkResult::Degraded(sets, detail));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ChunkResult::Exhausted)
    }

    /// Guarantee exactly one score set per chunk entry, in chunk order.
    fn enforce_contract(
        &self,
        chunk: &[crate::collection::Entry],
        sets: Vec<ScoreSet>,
    ) -> Vec<ScoreSet> {
        if sets.len() == chunk.len()
            && chunk.iter().zip(&sets).all(|(e, s)| e.id == s.entry_id)
        {
            return sets;
        }
        warn!(
            expected = chunk.len(),
            got = sets.len(),
            "provider broke the one-set-per-entry contract; realigning"
        );
        let mut by_id: HashMap<String, ScoreSet> =
            sets.into_iter().map(|s| (s.entry_id.clone(), s)).collect();
        chunk
            .iter()
            .map(|e| {
                by_id.remove(&e.id).unwrap_or_else(|| {
                    ScoreSet::failed(e.id.clone(), self.provider.name(), "no score set returned")
                })
            })
            .collect()
    }
}

enum ChunkResult {
    Scored(Vec<ScoreSet>),
    Degraded(Vec<ScoreSet>, String),
    Exhausted,
}

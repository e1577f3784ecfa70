//! Datcull: AI-assisted curation for XML game-list (DAT) collections.
//!
//! Datcull scores every entry of a game collection against weighted
//! criteria through a pluggable scoring provider, applies special-case
//! rules (multi-disc sets, regional variants, hacks/mods, low-score
//! exceptions), and produces a deterministic keep/exclude decision with
//! full provenance for every entry.
//!
//! # Core Principles
//!
//! - **Non-destructive**: source documents are never modified; kept entries
//!   are re-emitted with their attributes unchanged
//! - **Full provenance**: every decision records its scores, reasoning and
//!   the rules that overrode it
//! - **Resumable**: batch runs checkpoint after every chunk and resume from
//!   the first unscored chunk
//!
//! # Example
//!
//! ```no_run
//! use datcull::{Datcull, RandomProvider};
//!
//! let datcull = Datcull::new().with_provider(RandomProvider::with_seed(42));
//! let output = datcull.curate("games.dat").unwrap();
//!
//! let report = output.report.expect("run completed");
//! println!("{}", report.render_summary());
//! ```

pub mod collection;
pub mod compare;
pub mod criteria;
pub mod error;
pub mod filter;
pub mod provider;
pub mod report;
pub mod rules;
pub mod run;

mod datcull;

pub use crate::datcull::{CurationOutput, Datcull, DatcullConfig};
pub use collection::{Collection, DatParser, Entry, EntryGroup};
pub use criteria::{Criterion, CriterionRegistry};
pub use error::{DatcullError, Result};
pub use filter::{Decision, FilterEngine, FilterStats};
pub use provider::{LlmProvider, RandomProvider, ScoreProvider, ScoreSet};
pub use report::Report;
pub use rules::{RuleEngine, RuleOverride};
pub use run::{BatchRunner, CancelFlag, RunCheckpoint, RunState};

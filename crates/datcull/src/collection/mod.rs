//! Collection model: parsing, grouping and re-emission of game-list documents.
//!
//! The source format is the XML DAT shape used by game-list managers: a
//! root element carrying a `<header>` of simple key/value children and a
//! flat sequence of `<game>` (or `<machine>`/`<software>`) entries. Fields
//! the pipeline does not understand are carried through opaque and written
//! back unchanged for kept entries.

mod entry;
mod group;
mod parser;
mod writer;

pub use entry::{Collection, CollectionContext, Entry, RawField, Region, StructuralTags};
pub use group::{EntryGroup, detect_tags, group_entries, normalized_base_title};
pub use parser::{DatParser, ParserConfig};
pub use writer::{OutputMetadata, render_filtered, write_filtered_file};

//! In-memory model of a parsed game collection.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Release region detected from an entry's name markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Usa,
    Europe,
    Japan,
    World,
}

impl Region {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Region::Usa => "USA",
            Region::Europe => "Europe",
            Region::Japan => "Japan",
            Region::World => "World",
        }
    }
}

/// Structural tags derived from an entry's name (and description), used by
/// the grouping logic and the rule engine. Never written back to output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralTags {
    /// Disc index for multi-disc releases (`(Disc 2)`, `(CD 1)`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disc: Option<u32>,

    /// Release region (`(USA)`, `(Europe)`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,

    /// Revision marker (`(Rev A)`, `(v1.1)`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Whether the entry looks like an unofficial modification (hack, mod,
    /// fan translation, rebalance, ...).
    #[serde(default)]
    pub is_mod_or_hack: bool,
}

/// One opaque child element of an entry, preserved for re-emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawField {
    /// Element name (`description`, `year`, `rom`, ...).
    pub name: String,

    /// Element attributes in document order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, String>,

    /// Text content, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// One collection item (a game release).
///
/// Created during parsing; immutable thereafter. The `attributes` and
/// `fields` of the source element are pass-through data: the pipeline never
/// interprets them beyond tag detection, and the writer re-emits them
/// unchanged for kept entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Stable identifier: the `id` attribute when present, otherwise the
    /// entry name, disambiguated against earlier duplicates.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Element tag the entry was parsed from (`game`, `machine`, ...).
    pub element: String,

    /// Structural tags derived from the name.
    pub tags: StructuralTags,

    /// Source element attributes in document order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, String>,

    /// Source child elements in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<RawField>,
}

impl Entry {
    /// Text of the first child field with the given element name.
    pub fn field_text(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.text.as_deref())
    }

    /// Description text, if the entry carries one.
    pub fn description(&self) -> Option<&str> {
        self.field_text("description")
    }
}

/// A parsed game collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Root element tag of the source document (`datafile`, ...).
    pub root_tag: String,

    /// Root element attributes in document order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub root_attributes: IndexMap<String, String>,

    /// Header key/values in document order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub header: IndexMap<String, String>,

    /// Entries in document order.
    pub entries: Vec<Entry>,

    /// Content digest of the source document (`sha256:...`), the collection
    /// identity used for checkpoint keying.
    pub digest: String,
}

impl Collection {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the entry with the given id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Entry with the given id.
    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Console name extracted from the header, if recognizable.
    ///
    /// Headers typically carry `name` or `description` in the form
    /// `"Brand - Console Name (extra)"`; the console part is what scoring
    /// prompts care about.
    pub fn console_name(&self) -> Option<String> {
        for key in ["name", "description"] {
            if let Some(value) = self.header.get(key) {
                let console = match value.split_once(" - ") {
                    Some((_, rest)) => rest,
                    None => value.as_str(),
                };
                let console = match console.split_once('(') {
                    Some((before, _)) => before,
                    None => console,
                };
                let console = console.trim();
                if !console.is_empty() {
                    return Some(console.to_string());
                }
            }
        }
        None
    }

    /// Build the context handed to scoring providers.
    pub fn context(&self, sample_size: usize) -> CollectionContext {
        CollectionContext {
            collection_size: self.entries.len(),
            console: self.console_name(),
            sample_names: self
                .entries
                .iter()
                .take(sample_size)
                .map(|e| e.name.clone())
                .collect(),
        }
    }
}

/// Collection-level context that helps providers evaluate entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionContext {
    /// Total number of entries in the collection.
    pub collection_size: usize,

    /// Console the collection targets, when detectable from the header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console: Option<String>,

    /// A sample of entry names for flavor.
    #[serde(default)]
    pub sample_names: Vec<String>,
}

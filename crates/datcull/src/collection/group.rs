//! Base-title normalization and entry grouping.
//!
//! Two entries belong to the same [`EntryGroup`] iff their normalized base
//! titles are equal: lowercase, punctuation collapsed, with disc, region
//! and revision markers stripped. Groups are disjoint partitions over the
//! collection in order of first appearance.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::entry::{Collection, Region, StructuralTags};

/// Disc markers: `(Disc 2)`, `[CD 1]`, `- Disk 3`, trailing `Disc2`.
static DISC_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[(\[]\s*(?:disc|disk|cd)\s*(\d+)[^)\]]*[)\]]|[\s_-]+(?:disc|disk|cd)\s*(\d+)\b")
        .expect("disc marker regex")
});

/// Region markers: `(USA)`, `(U)`, `(Europe)`, `(PAL)`, `(Japan)`, `(NTSC-J)`, ...
static REGION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[(\[]\s*(usa|us|u|america|europe|eu|e|pal|japan|jp|j|ntsc-j|world|w|international)\s*[)\]]",
    )
    .expect("region marker regex")
});

/// Revision markers: `(Rev A)`, `(Rev 2)`, `(v1.1)`.
static REVISION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[(\[]\s*(rev\s*[a-z0-9.]+|v\d+(?:\.\d+)*)\s*[)\]]").expect("revision regex")
});

/// Keywords marking unofficial modifications.
static MOD_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:hack(?:ed)?|mod(?:ded|ified)?|fan translation|translat(?:ion|ed)|rebalanced?|overhaul|patched)\b")
        .expect("mod marker regex")
});

/// Runs of characters that do not contribute to title identity.
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("non-word regex"));

/// Derive structural tags from an entry's name and optional description.
pub fn detect_tags(name: &str, description: Option<&str>) -> StructuralTags {
    let disc = DISC_MARKER.captures(name).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
    });

    let region = REGION_MARKER
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| match m.as_str().to_ascii_lowercase().as_str() {
            "usa" | "us" | "u" | "america" => Some(Region::Usa),
            "europe" | "eu" | "e" | "pal" => Some(Region::Europe),
            "japan" | "jp" | "j" | "ntsc-j" => Some(Region::Japan),
            "world" | "w" | "international" => Some(Region::World),
            _ => None,
        });

    let revision = REVISION_MARKER
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    let is_mod_or_hack =
        MOD_MARKER.is_match(name) || description.is_some_and(|d| MOD_MARKER.is_match(d));

    StructuralTags {
        disc,
        region,
        revision,
        is_mod_or_hack,
    }
}

/// Normalize an entry name to its grouping key.
///
/// Case/punctuation-insensitive; disc, region and revision markers are
/// stripped first so `"Final Fantasy VII (USA) (Disc 1)"` and
/// `"Final Fantasy VII (Europe) (Disc 2)"` share a key.
pub fn normalized_base_title(name: &str) -> String {
    let stripped = DISC_MARKER.replace_all(name, " ");
    let stripped = REGION_MARKER.replace_all(&stripped, " ");
    let stripped = REVISION_MARKER.replace_all(&stripped, " ");
    let lowered = stripped.to_lowercase();
    NON_WORD.replace_all(&lowered, " ").trim().to_string()
}

/// A set of entries sharing a normalized base title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryGroup {
    /// The shared normalized base title.
    pub base_title: String,

    /// Indices into [`Collection::entries`], in document order.
    pub members: Vec<usize>,
}

impl EntryGroup {
    /// Number of member entries.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Partition a collection into entry groups by normalized base title.
///
/// Every entry lands in exactly one group; singleton groups are kept so the
/// rule engine sees the whole collection. Group order follows the first
/// appearance of each base title.
pub fn group_entries(collection: &Collection) -> Vec<EntryGroup> {
    let mut groups: Vec<EntryGroup> = Vec::new();
    let mut index_by_title: indexmap::IndexMap<String, usize> = indexmap::IndexMap::new();

    for (idx, entry) in collection.entries.iter().enumerate() {
        let title = normalized_base_title(&entry.name);
        match index_by_title.get(&title) {
            Some(&group_idx) => groups[group_idx].members.push(idx),
            None => {
                index_by_title.insert(title.clone(), groups.len());
                groups.push(EntryGroup {
                    base_title: title,
                    members: vec![idx],
                });
            }
        }
    }

    debug!(
        groups = groups.len(),
        entries = collection.entries.len(),
        "partitioned collection into entry groups"
    );
    groups
}

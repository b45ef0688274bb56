//! Cheap change detection: classify paths by comparing recorded entries with a
//! fresh snapshot, before any hashing happens.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::database::entry::{Entry, FileMetadata};
use crate::scanner::walker::Snapshot;

/// Disjoint classification of every path seen on either side.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: BTreeSet<PathBuf>,
    pub removed: BTreeSet<PathBuf>,
    /// Present on both sides with disagreeing metadata.
    pub modified: BTreeSet<PathBuf>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Paths that need a fresh digest.
    #[must_use]
    pub fn to_hash(&self) -> Vec<PathBuf> {
        self.added.iter().chain(&self.modified).cloned().collect()
    }
}

/// Whether recorded metadata agrees with the live filesystem.
///
/// Size, modification time (at persisted precision) and kind must all match.
/// An entry with missing metadata never matches.
#[must_use]
pub fn metadata_matches(entry: &Entry, live: &FileMetadata) -> bool {
    entry.size == Some(live.size)
        && entry.kind == Some(live.kind)
        && entry
            .mtime
            .is_some_and(|recorded| recorded.to_bits() == live.mtime.to_bits())
}

/// Partition recorded entries and a snapshot into added, removed and modified.
#[must_use]
pub fn detect_changes(entries: &BTreeMap<PathBuf, Entry>, snapshot: &Snapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (path, live) in &snapshot.entries {
        match entries.get(path) {
            None => {
                changes.added.insert(path.clone());
            }
            Some(entry) if !metadata_matches(entry, live) => {
                changes.modified.insert(path.clone());
            }
            Some(_) => {}
        }
    }

    changes.removed = entries
        .keys()
        .filter(|path| !snapshot.entries.contains_key(*path))
        .cloned()
        .collect();

    changes
}

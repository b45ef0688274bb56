//! Ordered schema migrations for the persisted database.
//!
//! Each step upgrades entries from exactly one version to the next. The table
//! must be contiguous and end at [`CURRENT_VERSION`]; loading walks it from the
//! persisted version upward.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::errors::{HdbError, Result};
use crate::database::entry::{Entry, EntryKind, FileMetadata};
use crate::hashing::digest::digest_symlink;

/// Schema version written by this build.
pub const CURRENT_VERSION: u32 = 2;

/// Version assumed for files that carry no `version` field.
pub const LEGACY_VERSION: u32 = 1;

pub type MigrationStep = fn(&mut BTreeMap<PathBuf, Entry>) -> Result<()>;

/// One registered upgrade `from -> from + 1`.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub from: u32,
    pub name: &'static str,
    pub step: MigrationStep,
}

/// Record of a step that ran during load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub from: u32,
    pub to: u32,
    pub name: &'static str,
}

/// Registered steps, ordered by source version.
pub const MIGRATIONS: &[Migration] = &[Migration {
    from: 1,
    name: "backfill_entry_kind",
    step: backfill_entry_kind,
}];

/// Check that `table` is sorted, gap-free and ends right below `current`.
pub fn validate_table(table: &[Migration], current: u32) -> Result<()> {
    let Some(first) = table.first() else {
        return Ok(());
    };
    let mut expected = first.from;
    for migration in table {
        if migration.from != expected {
            return Err(HdbError::MigrationGap { from: expected });
        }
        expected += 1;
    }
    if expected != current {
        return Err(HdbError::MigrationGap { from: expected });
    }
    Ok(())
}

/// Upgrade `entries` from `found` to `current` using `table`.
pub fn migrate_with(
    table: &[Migration],
    current: u32,
    found: u32,
    entries: &mut BTreeMap<PathBuf, Entry>,
) -> Result<Vec<AppliedMigration>> {
    if found > current {
        return Err(HdbError::UnsupportedVersion {
            found,
            supported: current,
        });
    }
    if found == current {
        return Ok(Vec::new());
    }
    validate_table(table, current)?;

    let mut applied = Vec::new();
    for version in found..current {
        let migration = table
            .iter()
            .find(|m| m.from == version)
            .ok_or(HdbError::MigrationGap { from: version })?;
        (migration.step)(entries)?;
        applied.push(AppliedMigration {
            from: version,
            to: version + 1,
            name: migration.name,
        });
    }
    Ok(applied)
}

/// Upgrade `entries` to [`CURRENT_VERSION`] with the registered table.
pub fn migrate(found: u32, entries: &mut BTreeMap<PathBuf, Entry>) -> Result<Vec<AppliedMigration>> {
    migrate_with(MIGRATIONS, CURRENT_VERSION, found, entries)
}

/// v1 -> v2: record the entry type from a live `lstat` and re-digest symlinks,
/// which v1 hashed by following them.
fn backfill_entry_kind(entries: &mut BTreeMap<PathBuf, Entry>) -> Result<()> {
    for (path, entry) in entries.iter_mut() {
        let Ok(Some(live)) = FileMetadata::read(path) else {
            continue;
        };
        entry.kind = Some(live.kind);
        if live.kind == EntryKind::Symlink {
            // A symlink that cannot be read keeps its old digest and fails
            // verification later.
            if let Ok(digest) = digest_symlink(path) {
                entry.digest = Some(digest);
            }
        }
    }
    Ok(())
}

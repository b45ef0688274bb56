//! The persisted hash database: locate, load, save, merge, update, verify, split.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::DEFAULT_DATABASE_FILE_NAME;
use crate::core::errors::{HdbError, Result};
use crate::core::paths::{decode_key, encode_key, relative_to, resolve_absolute_path};
use crate::database::entry::{Entry, EntryKind};
use crate::database::migration::{self, AppliedMigration, CURRENT_VERSION, LEGACY_VERSION};
use crate::hashing::engine::{HashEngine, HashOutcome, VerifyOutcome};
use crate::scanner::detector::{ChangeSet, detect_changes};
use crate::scanner::walker::{PathScanner, ScannerOptions};

// ──────────────────── persisted form ────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDatabase {
    #[serde(default = "legacy_version")]
    version: u32,
    #[serde(default)]
    files: BTreeMap<String, PersistedEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    mtime: Option<f64>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<u8>,
}

const fn legacy_version() -> u32 {
    LEGACY_VERSION
}

// ──────────────────── reports ────────────────────

/// Outcome of merging a hashed change set.
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub added: BTreeSet<PathBuf>,
    pub removed: BTreeSet<PathBuf>,
    /// Entries whose digest changed.
    pub modified: BTreeSet<PathBuf>,
    /// Entries whose metadata changed but whose digest did not.
    pub touched: BTreeSet<PathBuf>,
    /// Entries that could not be hashed; their prior state is kept.
    pub failures: Vec<(PathBuf, HdbError)>,
    /// Directories the scanner could not list; entries beneath them are kept.
    pub unreadable: Vec<PathBuf>,
}

impl UpdateReport {
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty())
    }
}

/// Options for [`HashDatabase::verify`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Refresh recorded size and mtime for entries that verify.
    pub update_mtimes: bool,
}

/// Outcome of re-hashing every tracked entry.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub verified: usize,
    /// Entries whose content no longer matches the stored digest.
    pub modified: BTreeSet<PathBuf>,
    /// Entries whose path no longer exists.
    pub removed: BTreeSet<PathBuf>,
    pub failures: Vec<(PathBuf, HdbError)>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty() && self.failures.is_empty()
    }
}

// ──────────────────── database ────────────────────

/// Versioned mapping from absolute path to recorded entry, anchored at `root`.
#[derive(Debug, Clone)]
pub struct HashDatabase {
    root: PathBuf,
    file_name: String,
    version: u32,
    entries: BTreeMap<PathBuf, Entry>,
    applied_migrations: Vec<AppliedMigration>,
}

impl HashDatabase {
    /// A fresh, empty database anchored at `root`.
    #[must_use]
    pub fn new(root: &Path, file_name: &str) -> Self {
        Self {
            root: resolve_absolute_path(root),
            file_name: file_name.to_string(),
            version: CURRENT_VERSION,
            entries: BTreeMap::new(),
            applied_migrations: Vec::new(),
        }
    }

    /// Search `start` and each ancestor for the database file.
    pub fn locate(start: &Path, file_name: &str) -> Result<PathBuf> {
        let start = resolve_absolute_path(start);
        let mut dir: &Path = &start;
        loop {
            let candidate = dir.join(file_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => return Err(HdbError::NotFound { start }),
            }
        }
    }

    /// Load the nearest database, or create an empty one at `start`.
    pub fn open(start: &Path, file_name: &str) -> Result<Self> {
        match Self::locate(start, file_name) {
            Ok(db_file) => Self::load(&db_file),
            Err(HdbError::NotFound { .. }) => Ok(Self::new(start, file_name)),
            Err(err) => Err(err),
        }
    }

    /// Load the nearest database; fail with `NotFound` if there is none.
    pub fn open_existing(start: &Path, file_name: &str) -> Result<Self> {
        Self::load(&Self::locate(start, file_name)?)
    }

    /// Parse a database file and migrate it to the current schema.
    pub fn load(db_file: &Path) -> Result<Self> {
        let db_file = resolve_absolute_path(db_file);
        let root = db_file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| HdbError::TypeMismatch {
                path: db_file.clone(),
            })?;
        let file_name = db_file
            .file_name()
            .map_or_else(|| DEFAULT_DATABASE_FILE_NAME.to_string(), |n| n.to_string_lossy().into_owned());

        let file = fs::File::open(&db_file).map_err(|e| HdbError::io(&db_file, e))?;
        let persisted: PersistedDatabase =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| HdbError::Serialization {
                context: "database_load",
                details: format!("{}: {e}", db_file.display()),
            })?;

        if persisted.version > CURRENT_VERSION {
            return Err(HdbError::UnsupportedVersion {
                found: persisted.version,
                supported: CURRENT_VERSION,
            });
        }

        let mut entries = BTreeMap::new();
        for (key, stored) in persisted.files {
            let path = join_relative(&root, &key)?;
            let kind = match stored.kind {
                None => None,
                Some(tag) => Some(EntryKind::from_tag(tag).ok_or_else(|| {
                    HdbError::Serialization {
                        context: "database_load",
                        details: format!("unknown entry type {tag} for {key}"),
                    }
                })?),
            };
            entries.insert(
                path.clone(),
                Entry {
                    path,
                    size: stored.size,
                    mtime: stored.mtime,
                    kind,
                    digest: stored.hash,
                },
            );
        }

        let applied_migrations = migration::migrate(persisted.version, &mut entries)?;

        Ok(Self {
            root,
            file_name,
            version: CURRENT_VERSION,
            entries,
            applied_migrations,
        })
    }

    /// Write the database atomically: temp file in the root, then rename.
    pub fn save(&self) -> Result<()> {
        let mut files = BTreeMap::new();
        for (path, entry) in &self.entries {
            let Some(relative) = relative_to(path, &self.root) else {
                return Err(HdbError::OutsideRoot {
                    path: path.clone(),
                    root: self.root.clone(),
                });
            };
            files.insert(
                encode_key(relative),
                PersistedEntry {
                    size: entry.size,
                    mtime: entry.mtime,
                    hash: entry.digest.clone(),
                    kind: entry.kind.map(EntryKind::as_tag),
                },
            );
        }
        let persisted = PersistedDatabase {
            version: self.version,
            files,
        };

        let db_path = self.db_path();
        let temp_path = self.temp_path();
        let file = {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            opts.open(&temp_path)
                .map_err(|e| HdbError::io(&temp_path, e))?
        };

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &persisted).map_err(|e| {
            HdbError::Serialization {
                context: "database_save",
                details: e.to_string(),
            }
        })?;
        writer
            .write_all(b"\n")
            .and_then(|()| writer.flush())
            .map_err(|e| HdbError::io(&temp_path, e))?;
        drop(writer);

        fs::rename(&temp_path, &db_path).map_err(|e| HdbError::io(&db_path, e))?;
        Ok(())
    }

    // ── accessors ──

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<PathBuf, Entry> {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&Entry> {
        self.entries.get(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Migrations that ran while this database was loaded.
    #[must_use]
    pub fn applied_migrations(&self) -> &[AppliedMigration] {
        &self.applied_migrations
    }

    /// Path of the persisted database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.root.join(&self.file_name)
    }

    /// Path of the temporary file used during [`Self::save`].
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        self.root.join(format!("{}.tmp", self.file_name))
    }

    /// Scanner over this database's root that skips its own files.
    #[must_use]
    pub fn scanner(&self, parallelism: usize) -> PathScanner {
        PathScanner::new(ScannerOptions {
            parallelism,
            excluded_paths: HashSet::from([self.db_path(), self.temp_path()]),
        })
    }

    // ── mutation ──

    /// Insert or replace one entry. Paths outside the root are rejected.
    pub fn insert(&mut self, entry: Entry) -> Result<Option<Entry>> {
        self.ensure_contained(&entry.path)?;
        Ok(self.entries.insert(entry.path.clone(), entry))
    }

    /// Apply a hashed change set.
    ///
    /// Removed paths are dropped; each successful hash inserts or refreshes its
    /// entry; failed hashes leave the entry as it was.
    pub fn merge(
        &mut self,
        changes: &ChangeSet,
        hashed: BTreeMap<PathBuf, HashOutcome>,
    ) -> UpdateReport {
        let mut report = UpdateReport::default();

        for path in &changes.removed {
            if self.entries.remove(path).is_some() {
                report.removed.insert(path.clone());
            }
        }

        for (path, outcome) in hashed {
            match outcome {
                HashOutcome::Failed(err) => report.failures.push((path, err)),
                HashOutcome::Hashed { metadata, digest } => {
                    if let Err(err) = self.ensure_contained(&path) {
                        report.failures.push((path, err));
                        continue;
                    }
                    match self.entries.get_mut(&path) {
                        Some(entry) => {
                            let changed = entry
                                .digest
                                .as_deref()
                                .is_none_or(|old| !old.eq_ignore_ascii_case(&digest));
                            entry.refresh_metadata(&metadata);
                            entry.digest = Some(digest);
                            if changed {
                                report.modified.insert(path);
                            } else {
                                report.touched.insert(path);
                            }
                        }
                        None => {
                            let mut entry = Entry::with_metadata(path.clone(), &metadata);
                            entry.digest = Some(digest);
                            self.entries.insert(path.clone(), entry);
                            report.added.insert(path);
                        }
                    }
                }
            }
        }

        report
    }

    /// Scan, detect, hash added and modified paths, and merge. Not persisted.
    pub fn update(&mut self, scan_parallelism: usize, engine: &HashEngine) -> Result<UpdateReport> {
        self.update_observed(scan_parallelism, engine, |_, _| {})
    }

    /// Like [`Self::update`], calling `observer` as each hash completes.
    pub fn update_observed<O>(
        &mut self,
        scan_parallelism: usize,
        engine: &HashEngine,
        observer: O,
    ) -> Result<UpdateReport>
    where
        O: Fn(&Path, &HashOutcome) + Sync,
    {
        let snapshot = self.scanner(scan_parallelism).scan(&self.root)?;
        let mut changes = detect_changes(&self.entries, &snapshot);
        if !snapshot.unreadable.is_empty() {
            changes
                .removed
                .retain(|path| !snapshot.unreadable.iter().any(|dir| path.starts_with(dir)));
        }

        let hashed = engine.hash_batch_observed(changes.to_hash(), observer);
        let mut report = self.merge(&changes, hashed);
        report.unreadable = snapshot.unreadable;
        Ok(report)
    }

    /// What [`Self::update`] would report, leaving this database untouched.
    pub fn status(&self, scan_parallelism: usize, engine: &HashEngine) -> Result<UpdateReport> {
        self.status_observed(scan_parallelism, engine, |_, _| {})
    }

    /// Like [`Self::status`], calling `observer` as each hash completes.
    pub fn status_observed<O>(
        &self,
        scan_parallelism: usize,
        engine: &HashEngine,
        observer: O,
    ) -> Result<UpdateReport>
    where
        O: Fn(&Path, &HashOutcome) + Sync,
    {
        self.clone().update_observed(scan_parallelism, engine, observer)
    }

    /// Re-hash every tracked entry and compare against the stored digests.
    pub fn verify<O>(
        &mut self,
        engine: &HashEngine,
        options: VerifyOptions,
        observer: O,
    ) -> VerifyReport
    where
        O: Fn(&Path, &VerifyOutcome) + Sync,
    {
        let expected = self
            .entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.digest.clone()))
            .collect();
        let outcomes = engine.verify_batch_observed(expected, observer);

        let mut report = VerifyReport::default();
        for (path, outcome) in outcomes {
            match outcome {
                VerifyOutcome::Verified { metadata } => {
                    report.verified += 1;
                    if options.update_mtimes
                        && let Some(entry) = self.entries.get_mut(&path)
                    {
                        entry.refresh_metadata(&metadata);
                    }
                }
                VerifyOutcome::ContentMismatch { .. } => {
                    report.modified.insert(path);
                }
                VerifyOutcome::Missing => {
                    report.removed.insert(path);
                }
                VerifyOutcome::Failed(err) => report.failures.push((path, err)),
            }
        }
        report
    }

    /// Extract the entries under `subdir` into a database anchored there.
    pub fn split(&self, subdir: &Path) -> Result<Self> {
        let target = resolve_absolute_path(subdir);
        let meta = fs::metadata(&target).map_err(|e| HdbError::io(&target, e))?;
        if !meta.is_dir() {
            return Err(HdbError::TypeMismatch { path: target });
        }
        if !target.starts_with(&self.root) {
            return Err(HdbError::OutsideRoot {
                path: target,
                root: self.root.clone(),
            });
        }

        let entries = self
            .entries
            .iter()
            .filter(|(path, _)| path.starts_with(&target))
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();
        Ok(Self {
            root: target,
            file_name: self.file_name.clone(),
            version: CURRENT_VERSION,
            entries,
            applied_migrations: Vec::new(),
        })
    }

    fn ensure_contained(&self, path: &Path) -> Result<()> {
        if path.starts_with(&self.root) && path != self.root {
            Ok(())
        } else {
            Err(HdbError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })
        }
    }
}

/// Join a persisted relative key onto `root`, refusing keys that escape it.
fn join_relative(root: &Path, key: &str) -> Result<PathBuf> {
    decode_key(key)
        .map(|relative| root.join(relative))
        .ok_or_else(|| HdbError::OutsideRoot {
            path: PathBuf::from(key),
            root: root.to_path_buf(),
        })
}

//! Parallel directory walker producing a metadata snapshot of a tree.
//!
//! The walker records every regular file and symbolic link under a root with
//! its `lstat` metadata. It never hashes and never descends into symlinks, so
//! a symlinked directory is recorded as a leaf.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;

use crate::core::errors::{HdbError, Result};
use crate::database::entry::FileMetadata;

/// Walker configuration derived from `ScannerConfig`.
#[derive(Debug, Clone)]
pub struct ScannerOptions {
    pub parallelism: usize,
    /// Exact paths never recorded (the database file and its temp file).
    pub excluded_paths: HashSet<PathBuf>,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            parallelism: thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            excluded_paths: HashSet::new(),
        }
    }
}

/// Live state of a tree at one point in time.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    /// Absolute path to metadata, for every file and symlink found.
    pub entries: BTreeMap<PathBuf, FileMetadata>,
    /// Directories that could not be listed.
    pub unreadable: Vec<PathBuf>,
}

impl Snapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&FileMetadata> {
        self.entries.get(path)
    }
}

enum ScanItem {
    Found(PathBuf, FileMetadata),
    Unreadable(PathBuf),
}

/// Parallel directory walker.
#[derive(Debug, Clone, Default)]
pub struct PathScanner {
    options: ScannerOptions,
}

impl PathScanner {
    #[must_use]
    pub const fn new(options: ScannerOptions) -> Self {
        Self { options }
    }

    /// Walk `root` and return a snapshot. Blocks until every worker finishes.
    ///
    /// Fails only if `root` itself cannot be inspected or is not a directory.
    pub fn scan(&self, root: &Path) -> Result<Snapshot> {
        let meta = fs::metadata(root).map_err(|source| HdbError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(HdbError::TypeMismatch {
                path: root.to_path_buf(),
            });
        }

        // The work queue must be unbounded: dropping a directory would silently
        // hide its files from change detection.
        let (work_tx, work_rx) = channel::unbounded::<PathBuf>();
        let (result_tx, result_rx) = channel::unbounded::<ScanItem>();
        let in_flight = AtomicUsize::new(1);
        let _ = work_tx.send(root.to_path_buf());

        thread::scope(|scope| {
            for _ in 0..self.options.parallelism.max(1) {
                let work_rx = work_rx.clone();
                let work_tx = work_tx.clone();
                let result_tx = result_tx.clone();
                let in_flight = &in_flight;
                let excluded = &self.options.excluded_paths;
                scope.spawn(move || {
                    walker_thread(&work_rx, &work_tx, &result_tx, in_flight, excluded);
                });
            }
        });
        drop(result_tx);

        let mut snapshot = Snapshot::default();
        for item in result_rx {
            match item {
                ScanItem::Found(path, metadata) => {
                    snapshot.entries.insert(path, metadata);
                }
                ScanItem::Unreadable(path) => snapshot.unreadable.push(path),
            }
        }
        snapshot.unreadable.sort();
        Ok(snapshot)
    }
}

/// Pull directories off the work queue until no directory is in flight.
fn walker_thread(
    work_rx: &channel::Receiver<PathBuf>,
    work_tx: &channel::Sender<PathBuf>,
    result_tx: &channel::Sender<ScanItem>,
    in_flight: &AtomicUsize,
    excluded: &HashSet<PathBuf>,
) {
    loop {
        match work_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(dir_path) => {
                process_directory(&dir_path, work_tx, result_tx, in_flight, excluded);
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// List one directory: emit its files and symlinks, queue its subdirectories.
fn process_directory(
    dir_path: &Path,
    work_tx: &channel::Sender<PathBuf>,
    result_tx: &channel::Sender<ScanItem>,
    in_flight: &AtomicUsize,
    excluded: &HashSet<PathBuf>,
) {
    let entries = match fs::read_dir(dir_path) {
        Ok(entries) => entries,
        // Removed after being queued.
        Err(err) if err.kind() == ErrorKind::NotFound => return,
        Err(_) => {
            let _ = result_tx.send(ScanItem::Unreadable(dir_path.to_path_buf()));
            return;
        }
    };

    for entry_result in entries {
        let Ok(entry) = entry_result else {
            continue;
        };
        let child_path = entry.path();
        if excluded.contains(&child_path) {
            continue;
        }

        let Ok(ft) = entry.file_type() else {
            continue;
        };
        if ft.is_dir() {
            in_flight.fetch_add(1, Ordering::AcqRel);
            if work_tx.send(child_path).is_err() {
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            continue;
        }

        // lstat; entries that vanished since the listing are skipped.
        let Ok(meta) = fs::symlink_metadata(&child_path) else {
            continue;
        };
        if let Some(metadata) = FileMetadata::from_fs(&meta) {
            let _ = result_tx.send(ScanItem::Found(child_path, metadata));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::entry::EntryKind;

    fn scanner() -> PathScanner {
        PathScanner::new(ScannerOptions {
            parallelism: 2,
            excluded_paths: HashSet::new(),
        })
    }

    #[test]
    fn walks_simple_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("top.txt"), "top").unwrap();
        fs::write(root.join("a/one.txt"), "1").unwrap();
        fs::write(root.join("a/b/c/deep.txt"), "deep").unwrap();

        let snapshot = scanner().scan(root).unwrap();
        let paths: Vec<&PathBuf> = snapshot.entries.keys().collect();
        assert_eq!(
            paths,
            vec![
                &root.join("a/b/c/deep.txt"),
                &root.join("a/one.txt"),
                &root.join("top.txt"),
            ]
        );
        assert_eq!(snapshot.get(&root.join("top.txt")).unwrap().size, 3);
    }

    #[test]
    fn handles_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("empty")).unwrap();
        let snapshot = scanner().scan(tmp.path()).unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.unreadable.is_empty());
    }

    #[test]
    fn skips_excluded_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join(".hash_db.json");
        fs::write(&db, "{}").unwrap();
        fs::write(tmp.path().join("keep.txt"), "k").unwrap();

        let scanner = PathScanner::new(ScannerOptions {
            parallelism: 1,
            excluded_paths: HashSet::from([db.clone()]),
        });
        let snapshot = scanner.scan(tmp.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get(&db).is_none());
    }

    #[test]
    fn root_must_be_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            scanner().scan(&file),
            Err(HdbError::TypeMismatch { .. })
        ));
        assert!(scanner().scan(&tmp.path().join("missing")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn does_not_follow_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("hidden.txt"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("linked_dir")).unwrap();
        std::os::unix::fs::symlink("nowhere", root.join("dangling")).unwrap();

        let snapshot = scanner().scan(root).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.get(&root.join("linked_dir")).unwrap().kind,
            EntryKind::Symlink
        );
        assert_eq!(
            snapshot.get(&root.join("dangling")).unwrap().kind,
            EntryKind::Symlink
        );
    }

    #[test]
    fn wide_tree_is_fully_enumerated() {
        let tmp = tempfile::tempdir().unwrap();
        for d in 0..50 {
            let dir = tmp.path().join(format!("d{d}"));
            fs::create_dir(&dir).unwrap();
            for f in 0..5 {
                fs::write(dir.join(format!("f{f}")), "x").unwrap();
            }
        }
        let snapshot = PathScanner::new(ScannerOptions {
            parallelism: 4,
            excluded_paths: HashSet::new(),
        })
        .scan(tmp.path())
        .unwrap();
        assert_eq!(snapshot.len(), 250);
    }
}

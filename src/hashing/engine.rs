//! Parallel hashing pool with per-entry failure isolation.
//!
//! Units are pushed onto a `crossbeam-channel` work queue, drained by a fixed
//! set of scoped worker threads, and sent back on a result channel. The calling
//! thread blocks until every unit has completed.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::unbounded;
use parking_lot::Mutex;

use crate::core::errors::HdbError;
use crate::database::entry::FileMetadata;
use crate::hashing::digest::digest_path;

/// Callback invoked with `(completed, total)` after each finished unit.
pub type ProgressCallback = dyn Fn(usize, usize) + Send + Sync;

/// Result of hashing one path.
#[derive(Debug)]
pub enum HashOutcome {
    Hashed {
        metadata: FileMetadata,
        digest: String,
    },
    Failed(HdbError),
}

/// Result of re-hashing one tracked path against its stored digest.
#[derive(Debug)]
pub enum VerifyOutcome {
    Verified { metadata: FileMetadata },
    ContentMismatch { metadata: FileMetadata, actual: String },
    Missing,
    Failed(HdbError),
}

impl VerifyOutcome {
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

/// Completion counter shared by all workers of one batch.
pub struct ProgressCounter {
    total: usize,
    completed: Mutex<usize>,
    callback: Option<Arc<ProgressCallback>>,
}

impl ProgressCounter {
    #[must_use]
    pub fn new(total: usize, callback: Option<Arc<ProgressCallback>>) -> Self {
        Self {
            total,
            completed: Mutex::new(0),
            callback,
        }
    }

    /// Record one completion and notify the callback outside the lock.
    pub fn increment(&self) -> usize {
        let done = {
            let mut guard = self.completed.lock();
            *guard += 1;
            *guard
        };
        if let Some(callback) = &self.callback {
            callback(done, self.total);
        }
        done
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        *self.completed.lock()
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }
}

/// Bounded pool that hashes batches of paths.
#[derive(Clone)]
pub struct HashEngine {
    parallelism: usize,
    progress: Option<Arc<ProgressCallback>>,
}

impl std::fmt::Debug for HashEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashEngine")
            .field("parallelism", &self.parallelism)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get))
    }
}

impl HashEngine {
    #[must_use]
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    #[must_use]
    pub const fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Hash every path, returning one outcome per input path.
    ///
    /// A failing path never aborts the batch.
    pub fn hash_batch(&self, paths: Vec<PathBuf>) -> BTreeMap<PathBuf, HashOutcome> {
        self.hash_batch_observed(paths, |_, _| {})
    }

    /// Like [`Self::hash_batch`], calling `observer` on the worker thread as
    /// each outcome becomes known.
    pub fn hash_batch_observed<O>(
        &self,
        paths: Vec<PathBuf>,
        observer: O,
    ) -> BTreeMap<PathBuf, HashOutcome>
    where
        O: Fn(&Path, &HashOutcome) + Sync,
    {
        self.run_pool(paths, |path| {
            let outcome = match digest_path(&path) {
                Ok((metadata, digest)) => HashOutcome::Hashed { metadata, digest },
                Err(err) => HashOutcome::Failed(err),
            };
            observer(&path, &outcome);
            (path, outcome)
        })
        .into_iter()
        .collect()
    }

    /// Re-hash `(path, expected_digest)` pairs and classify each one.
    pub fn verify_batch(
        &self,
        expected: Vec<(PathBuf, Option<String>)>,
    ) -> BTreeMap<PathBuf, VerifyOutcome> {
        self.verify_batch_observed(expected, |_, _| {})
    }

    /// Like [`Self::verify_batch`], calling `observer` on the worker thread as
    /// each outcome becomes known.
    pub fn verify_batch_observed<O>(
        &self,
        expected: Vec<(PathBuf, Option<String>)>,
        observer: O,
    ) -> BTreeMap<PathBuf, VerifyOutcome>
    where
        O: Fn(&Path, &VerifyOutcome) + Sync,
    {
        self.run_pool(expected, |(path, stored)| {
            let outcome = match digest_path(&path) {
                Ok((metadata, actual)) => {
                    if stored
                        .as_deref()
                        .is_some_and(|s| s.eq_ignore_ascii_case(&actual))
                    {
                        VerifyOutcome::Verified { metadata }
                    } else {
                        VerifyOutcome::ContentMismatch { metadata, actual }
                    }
                }
                Err(err) if err.is_missing_path() => VerifyOutcome::Missing,
                Err(err) => VerifyOutcome::Failed(err),
            };
            observer(&path, &outcome);
            (path, outcome)
        })
        .into_iter()
        .collect()
    }

    fn run_pool<T, R, F>(&self, units: Vec<T>, work: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        let total = units.len();
        if total == 0 {
            return Vec::new();
        }

        let progress = ProgressCounter::new(total, self.progress.clone());
        let (work_tx, work_rx) = unbounded::<T>();
        let (result_tx, result_rx) = unbounded::<R>();
        for unit in units {
            // Receiver is alive until the scope below ends.
            let _ = work_tx.send(unit);
        }
        drop(work_tx);

        let workers = self.parallelism.min(total);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let work = &work;
                let progress = &progress;
                scope.spawn(move || {
                    for unit in &work_rx {
                        let result = work(unit);
                        progress.increment();
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        result_rx.into_iter().collect()
    }
}

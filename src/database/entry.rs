//! Tracked entries and the cheap filesystem metadata they are compared against.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Type of a tracked filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    RegularFile,
    Symlink,
}

impl EntryKind {
    /// Numeric tag used in the persisted database (`"type"` field).
    #[must_use]
    pub const fn as_tag(self) -> u8 {
        match self {
            Self::RegularFile => 0,
            Self::Symlink => 1,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::RegularFile),
            1 => Some(Self::Symlink),
            _ => None,
        }
    }

    /// Classify a `symlink_metadata` result. Directories and special files are
    /// not tracked.
    #[must_use]
    pub fn from_file_type(file_type: fs::FileType) -> Option<Self> {
        if file_type.is_symlink() {
            Some(Self::Symlink)
        } else if file_type.is_file() {
            Some(Self::RegularFile)
        } else {
            None
        }
    }
}

/// Cheap metadata for a live file or symlink, as returned by `lstat`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileMetadata {
    pub size: u64,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: f64,
    pub kind: EntryKind,
}

impl FileMetadata {
    /// Build from `fs::Metadata` obtained without following symlinks.
    ///
    /// Returns `None` for directories and special files.
    #[must_use]
    pub fn from_fs(meta: &fs::Metadata) -> Option<Self> {
        let kind = EntryKind::from_file_type(meta.file_type())?;
        Some(Self {
            size: meta.len(),
            mtime: meta.modified().map_or(0.0, epoch_seconds),
            kind,
        })
    }

    /// `lstat` a path. `Ok(None)` means the path exists but is not trackable.
    pub fn read(path: &Path) -> io::Result<Option<Self>> {
        fs::symlink_metadata(path).map(|meta| Self::from_fs(&meta))
    }
}

/// Convert a timestamp to fractional seconds since the epoch.
///
/// This is the precision at which modification times are persisted and
/// compared, so both sides of every comparison go through this function.
#[must_use]
pub fn epoch_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(before) => -before.duration().as_secs_f64(),
    }
}

/// One tracked file or symlink.
///
/// Metadata fields are `None` for entries imported from a manifest whose
/// target does not exist, and `kind` is `None` for entries loaded from a
/// schema that predates it (until migrated).
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: PathBuf,
    pub size: Option<u64>,
    pub mtime: Option<f64>,
    pub kind: Option<EntryKind>,
    pub digest: Option<String>,
}

impl Entry {
    /// A bare entry with no metadata or digest yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: None,
            mtime: None,
            kind: None,
            digest: None,
        }
    }

    #[must_use]
    pub fn with_metadata(path: impl Into<PathBuf>, meta: &FileMetadata) -> Self {
        let mut entry = Self::new(path);
        entry.refresh_metadata(meta);
        entry
    }

    /// Overwrite size, mtime, and kind from live metadata.
    pub fn refresh_metadata(&mut self, meta: &FileMetadata) {
        self.size = Some(meta.size);
        self.mtime = Some(meta.mtime);
        self.kind = Some(meta.kind);
    }
}

//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use hashdb::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{HdbError, Result};

// Database
pub use crate::database::entry::{Entry, EntryKind, FileMetadata};
pub use crate::database::store::{HashDatabase, UpdateReport, VerifyOptions, VerifyReport};

// Hashing
pub use crate::hashing::digest::{EMPTY_DIGEST, digest_path};
pub use crate::hashing::engine::{HashEngine, HashOutcome, VerifyOutcome};

// Scanner
pub use crate::scanner::detector::{ChangeSet, detect_changes, metadata_matches};
pub use crate::scanner::walker::{PathScanner, ScannerOptions, Snapshot};

// Manifests
pub use crate::manifest::{ExportReport, ImportReport, export_manifest, import_manifest};

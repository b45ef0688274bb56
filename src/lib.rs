//! hashdb: an offline file-integrity monitor.
//!
//! A [`database::HashDatabase`] records a SHA-512 digest plus cheap metadata
//! for every regular file and symbolic link under a root directory, persisted
//! as `.hash_db.json` at that root. Later runs compare the live tree against
//! the recording:
//!
//! 1. **update**: scan metadata, re-hash only what looks changed, merge
//! 2. **verify**: re-hash everything and compare with the stored digests
//! 3. **import / export**: interoperate with `sha512sum` manifests
//!
//! # Library usage
//!
//! ```rust,no_run
//! use hashdb::prelude::*;
//!
//! # fn main() -> hashdb::core::errors::Result<()> {
//! let mut db = HashDatabase::open(std::path::Path::new("."), ".hash_db.json")?;
//! let report = db.update(4, &HashEngine::new(4))?;
//! println!("{} added", report.added.len());
//! db.save()?;
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod core;
pub mod database;
pub mod hashing;
pub mod logger;
pub mod manifest;
pub mod scanner;

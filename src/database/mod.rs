//! Versioned hash database: data model, schema migrations, persistence.

pub mod entry;
pub mod migration;
pub mod store;

pub use entry::{Entry, EntryKind, FileMetadata};
pub use store::{HashDatabase, UpdateReport, VerifyOptions, VerifyReport};

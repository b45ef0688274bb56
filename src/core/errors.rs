//! HDB-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HdbError>;

/// Top-level error type for hashdb.
#[derive(Debug, Error)]
pub enum HdbError {
    #[error("[HDB-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[HDB-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[HDB-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[HDB-2001] no hash database found in {start} or any parent directory")]
    NotFound { start: PathBuf },

    #[error("[HDB-2002] {path} is not a directory")]
    TypeMismatch { path: PathBuf },

    #[error("[HDB-2003] {path} is outside database root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("[HDB-2101] database schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("[HDB-2102] no migration step registered for schema version {from}")]
    MigrationGap { from: u32 },

    #[error("[HDB-2103] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[HDB-3001] hashing failed for {path}: {details}")]
    HashFailure { path: PathBuf, details: String },

    #[error("[HDB-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HdbError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "HDB-1001",
            Self::MissingConfig { .. } => "HDB-1002",
            Self::ConfigParse { .. } => "HDB-1003",
            Self::NotFound { .. } => "HDB-2001",
            Self::TypeMismatch { .. } => "HDB-2002",
            Self::OutsideRoot { .. } => "HDB-2003",
            Self::UnsupportedVersion { .. } => "HDB-2101",
            Self::MigrationGap { .. } => "HDB-2102",
            Self::Serialization { .. } => "HDB-2103",
            Self::HashFailure { .. } => "HDB-3001",
            Self::Io { .. } => "HDB-3002",
        }
    }

    /// Whether the failure is caused by the caller's input rather than the
    /// environment (used by the CLI for exit-code mapping).
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::TypeMismatch { .. }
                | Self::OutsideRoot { .. }
                | Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether this IO error means the path no longer exists: the entry itself
    /// is gone, or a parent directory was replaced by a non-directory.
    #[must_use]
    pub fn is_missing_path(&self) -> bool {
        matches!(
            self,
            Self::Io { source, .. } if matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            )
        )
    }
}

impl From<serde_json::Error> for HdbError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HdbError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<HdbError> {
        vec![
            HdbError::InvalidConfig {
                details: String::new(),
            },
            HdbError::MissingConfig {
                path: PathBuf::new(),
            },
            HdbError::ConfigParse {
                context: "",
                details: String::new(),
            },
            HdbError::NotFound {
                start: PathBuf::new(),
            },
            HdbError::TypeMismatch {
                path: PathBuf::new(),
            },
            HdbError::OutsideRoot {
                path: PathBuf::new(),
                root: PathBuf::new(),
            },
            HdbError::UnsupportedVersion {
                found: 3,
                supported: 2,
            },
            HdbError::MigrationGap { from: 0 },
            HdbError::Serialization {
                context: "",
                details: String::new(),
            },
            HdbError::HashFailure {
                path: PathBuf::new(),
                details: String::new(),
            },
            HdbError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(HdbError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_includes_code() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code: {msg}"
            );
        }
    }

    #[test]
    fn user_errors_are_classified() {
        assert!(
            HdbError::TypeMismatch {
                path: PathBuf::from("/tmp/file")
            }
            .is_user_error()
        );
        assert!(
            HdbError::NotFound {
                start: PathBuf::from("/tmp")
            }
            .is_user_error()
        );
        assert!(!HdbError::io("/tmp/x", std::io::Error::other("boom")).is_user_error());
        assert!(!HdbError::MigrationGap { from: 1 }.is_user_error());
    }

    #[test]
    fn io_convenience_constructor() {
        let err = HdbError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "HDB-3002");
        assert!(err.to_string().contains("/tmp/test.txt"));
        assert!(err.is_missing_path());
    }

    #[test]
    fn not_a_directory_counts_as_missing() {
        let err = HdbError::io(
            "/tmp/was-a-dir/file",
            std::io::Error::from(std::io::ErrorKind::NotADirectory),
        );
        assert!(err.is_missing_path());
        assert!(!HdbError::io("/tmp/x", std::io::Error::other("boom")).is_missing_path());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: HdbError = json_err.into();
        assert_eq!(err.code(), "HDB-2103");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: HdbError = toml_err.into();
        assert_eq!(err.code(), "HDB-1003");
    }
}

//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HdbError, Result};

/// Default name of the persisted database file.
pub const DEFAULT_DATABASE_FILE_NAME: &str = ".hash_db.json";

/// Default name of the exported manifest file.
pub const DEFAULT_MANIFEST_EXPORT_NAME: &str = "SHA512SUM";

/// Full hashdb configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub hashing: HashingConfig,
    pub scanner: ScannerConfig,
    pub manifest: ManifestConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Where and how the database is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub file_name: String,
}

/// Hash worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HashingConfig {
    pub parallelism: usize,
}

/// Directory walker sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    pub parallelism: usize,
}

/// Checksum manifest naming for import discovery and export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManifestConfig {
    pub export_name: String,
    /// Exact file names recognized as manifests during import discovery.
    pub import_names: Vec<String>,
    /// File-name suffixes recognized as manifests during import discovery.
    pub import_suffixes: Vec<String>,
}

/// JSONL activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub activity_log: PathBuf,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

/// Filesystem paths used by hashdb itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn home_dir(purpose: &str) -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[HDB-CONFIG] WARNING: HOME not set, falling back to /tmp for {purpose}");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_DATABASE_FILE_NAME.to_string(),
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            export_name: DEFAULT_MANIFEST_EXPORT_NAME.to_string(),
            import_names: vec!["SHA512SUM".to_string(), "SHA512SUMS".to_string()],
            import_suffixes: vec![".sha512sum".to_string(), ".sha512".to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let data = home_dir("log paths")
            .join(".local")
            .join("share")
            .join("hashdb");
        Self {
            enabled: true,
            activity_log: data.join("activity.jsonl"),
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let cfg = home_dir("config paths")
            .join(".config")
            .join("hashdb")
            .join("config.toml");
        Self { config_file: cfg }
    }
}

impl ManifestConfig {
    /// Whether a file name identifies a checksum manifest.
    #[must_use]
    pub fn is_manifest_name(&self, file_name: &str) -> bool {
        self.import_names.iter().any(|name| name == file_name)
            || self
                .import_suffixes
                .iter()
                .any(|suffix| file_name.len() > suffix.len() && file_name.ends_with(suffix.as_str()))
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HdbError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(HdbError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("HASHDB_DATABASE_FILE_NAME") {
            self.database.file_name = raw;
        }
        if let Some(raw) = lookup("HASHDB_HASHING_PARALLELISM") {
            self.hashing.parallelism = parse_env_usize("HASHDB_HASHING_PARALLELISM", &raw)?;
        }
        if let Some(raw) = lookup("HASHDB_SCANNER_PARALLELISM") {
            self.scanner.parallelism = parse_env_usize("HASHDB_SCANNER_PARALLELISM", &raw)?;
        }
        if let Some(raw) = lookup("HASHDB_MANIFEST_EXPORT_NAME") {
            self.manifest.export_name = raw;
        }
        if let Some(raw) = lookup("HASHDB_LOGGING_ENABLED") {
            self.logging.enabled = parse_env_bool("HASHDB_LOGGING_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("HASHDB_LOGGING_ACTIVITY_LOG") {
            self.logging.activity_log = PathBuf::from(raw);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.hashing.parallelism == 0 {
            return Err(HdbError::InvalidConfig {
                details: "hashing.parallelism must be >= 1".to_string(),
            });
        }
        if self.scanner.parallelism == 0 {
            return Err(HdbError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }

        for (name, value) in [
            ("database.file_name", &self.database.file_name),
            ("manifest.export_name", &self.manifest.export_name),
        ] {
            validate_file_name(name, value)?;
        }
        for value in &self.manifest.import_names {
            validate_file_name("manifest.import_names", value)?;
        }
        if self.manifest.import_suffixes.iter().any(String::is_empty) {
            return Err(HdbError::InvalidConfig {
                details: "manifest.import_suffixes must not contain empty suffixes".to_string(),
            });
        }

        if self.logging.enabled && self.logging.max_size_bytes == 0 {
            return Err(HdbError::InvalidConfig {
                details: "logging.max_size_bytes must be > 0 when logging is enabled".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_file_name(name: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') || value.contains('\\') || value == ".." {
        return Err(HdbError::InvalidConfig {
            details: format!("{name} must be a plain file name, got {value:?}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|error| HdbError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .parse::<bool>()
        .map_err(|error| HdbError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Config, HdbError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.database.file_name, ".hash_db.json");
        assert_eq!(cfg.manifest.export_name, "SHA512SUM");
        assert!(cfg.hashing.parallelism >= 1);
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = Config::default();
        cfg.hashing.parallelism = 0;
        assert!(matches!(
            cfg.validate(),
            Err(HdbError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn file_name_with_separator_rejected() {
        let mut cfg = Config::default();
        cfg.database.file_name = "nested/db.json".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("database.file_name"));
    }

    #[test]
    fn env_overrides_apply() {
        let env = vars(&[
            ("HASHDB_DATABASE_FILE_NAME", "integrity.json"),
            ("HASHDB_HASHING_PARALLELISM", "3"),
            ("HASHDB_LOGGING_ENABLED", "false"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap();

        assert_eq!(cfg.database.file_name, "integrity.json");
        assert_eq!(cfg.hashing.parallelism, 3);
        assert!(!cfg.logging.enabled);
    }

    #[test]
    fn env_invalid_number_rejected() {
        let env = vars(&[("HASHDB_SCANNER_PARALLELISM", "many")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap_err();
        assert_eq!(err.code(), "HDB-1003");
    }

    #[test]
    fn toml_sections_parse_with_defaults() {
        let raw = r#"
            [hashing]
            parallelism = 2

            [manifest]
            export_name = "CHECKSUMS"
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.hashing.parallelism, 2);
        assert_eq!(cfg.manifest.export_name, "CHECKSUMS");
        assert_eq!(cfg.database.file_name, ".hash_db.json");
        assert!(!cfg.manifest.import_names.is_empty());
    }

    #[test]
    fn manifest_name_matching() {
        let cfg = Config::default();
        assert!(cfg.manifest.is_manifest_name("SHA512SUM"));
        assert!(cfg.manifest.is_manifest_name("release.sha512sum"));
        assert!(cfg.manifest.is_manifest_name("disk.img.sha512"));
        assert!(!cfg.manifest.is_manifest_name(".sha512"));
        assert!(!cfg.manifest.is_manifest_name("SHA256SUM"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let missing = Path::new("/definitely/not/here/hashdb.toml");
        let err = Config::load(Some(missing)).unwrap_err();
        assert!(matches!(err, HdbError::MissingConfig { path } if path == PathBuf::from(missing)));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[database]\nfile_name = \"db.json\"\n").unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let a = Config::default();
        let mut b = Config::default();
        b.manifest.export_name = "OTHER".to_string();
        assert_eq!(a.stable_hash().unwrap(), a.stable_hash().unwrap());
        assert_ne!(a.stable_hash().unwrap(), b.stable_hash().unwrap());
    }
}

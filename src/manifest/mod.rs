//! Checksum manifest interoperability: import, discovery, export.
//!
//! Manifests are `sha512sum` output: one `<hex digest>  <path>` per line, with
//! paths relative to the manifest's own directory.

#![allow(missing_docs)]

pub mod parser;

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::config::ManifestConfig;
use crate::core::errors::{HdbError, Result};
use crate::core::paths::{
    encode_key, normalize_separators, relative_to, resolve_absolute_path, resolve_entry_path,
    unescape_name,
};
use crate::database::entry::{Entry, EntryKind, FileMetadata};
use crate::database::store::HashDatabase;
use crate::scanner::walker::{PathScanner, ScannerOptions};

pub use parser::{ManifestLine, ParsedManifest, format_line, parse_line, parse_manifest};

/// Per-manifest import counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub manifest: PathBuf,
    pub imported: usize,
    /// Malformed lines.
    pub skipped: usize,
    /// Lines whose path resolves outside the database root.
    pub outside_root: usize,
    /// Imported entries whose target does not currently exist.
    pub missing_targets: usize,
}

/// Result of writing a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub written: usize,
}

/// Merge one manifest file into `db`.
///
/// Each accepted line replaces any existing entry for its path. Metadata comes
/// from a live `lstat`; a missing target keeps only its digest.
pub fn import_manifest(db: &mut HashDatabase, manifest: &Path) -> Result<ImportReport> {
    let manifest = resolve_absolute_path(manifest);
    let content = fs::read(&manifest).map_err(|e| HdbError::io(&manifest, e))?;
    let parsed = parse_manifest(&String::from_utf8_lossy(&content));
    let base = manifest
        .parent()
        .map_or_else(|| db.root().to_path_buf(), Path::to_path_buf);

    let mut report = ImportReport {
        manifest: manifest.clone(),
        imported: 0,
        skipped: parsed.skipped,
        outside_root: 0,
        missing_targets: 0,
    };

    for line in parsed.lines {
        let relative = if line.escaped {
            match unescape_name(&line.path) {
                Some(name) => PathBuf::from(name),
                None => {
                    report.skipped += 1;
                    continue;
                }
            }
        } else {
            normalize_separators(&line.path)
        };
        let path = resolve_entry_path(&base.join(relative));
        let mut entry = Entry::new(&path);
        entry.digest = Some(line.digest);
        let missing = match FileMetadata::read(&path) {
            Ok(Some(meta)) => {
                entry.refresh_metadata(&meta);
                false
            }
            // Directories and special files are not trackable.
            Ok(None) => {
                report.skipped += 1;
                continue;
            }
            Err(_) => true,
        };

        match db.insert(entry) {
            Ok(_) => {
                report.imported += 1;
                report.missing_targets += usize::from(missing);
            }
            Err(HdbError::OutsideRoot { .. }) => report.outside_root += 1,
            Err(err) => return Err(err),
        }
    }

    Ok(report)
}

/// Find every manifest file under `search_root`, sorted by path.
pub fn discover_manifests(
    search_root: &Path,
    config: &ManifestConfig,
    parallelism: usize,
) -> Result<Vec<PathBuf>> {
    let snapshot = PathScanner::new(ScannerOptions {
        parallelism,
        ..ScannerOptions::default()
    })
    .scan(search_root)?;

    Ok(snapshot
        .entries
        .into_iter()
        .filter(|(path, meta)| {
            meta.kind == EntryKind::RegularFile
                && path
                    .file_name()
                    .is_some_and(|name| config.is_manifest_name(&name.to_string_lossy()))
        })
        .map(|(path, _)| path)
        .collect())
}

/// Discover and import every manifest under `search_root`.
pub fn import_tree(
    db: &mut HashDatabase,
    search_root: &Path,
    config: &ManifestConfig,
    parallelism: usize,
) -> Result<Vec<ImportReport>> {
    discover_manifests(search_root, config, parallelism)?
        .iter()
        .map(|manifest| import_manifest(db, manifest))
        .collect()
}

/// Render every digested entry as manifest text, sorted by relative path.
#[must_use]
pub fn render_manifest(db: &HashDatabase) -> (String, usize) {
    let mut lines: Vec<(String, &str)> = db
        .entries()
        .iter()
        .filter_map(|(path, entry)| {
            let digest = entry.digest.as_deref()?;
            let relative = relative_to(path, db.root())?;
            Some((encode_key(relative), digest))
        })
        .collect();
    lines.sort_unstable();

    let count = lines.len();
    let text = lines
        .iter()
        .map(|(path, digest)| format_line(digest, path))
        .collect();
    (text, count)
}

/// Write the manifest for `db` to `<root>/<file_name>`, atomically.
pub fn export_manifest(db: &HashDatabase, file_name: &str) -> Result<ExportReport> {
    let (text, written) = render_manifest(db);
    let path = db.root().join(file_name);
    let temp_path = db.root().join(format!("{file_name}.tmp"));

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| HdbError::io(&temp_path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(text.as_bytes())
        .and_then(|()| writer.flush())
        .map_err(|e| HdbError::io(&temp_path, e))?;
    drop(writer);
    fs::rename(&temp_path, &path).map_err(|e| HdbError::io(&path, e))?;

    Ok(ExportReport { path, written })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::hashing::digest::{EMPTY_DIGEST, digest_bytes};
    use crate::hashing::engine::HashEngine;

    const DB: &str = ".hash_db.json";

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        (tmp, root)
    }

    #[test]
    fn import_skips_malformed_lines() {
        let (_tmp, root) = fixture();
        fs::write(root.join("a.txt"), "hi").unwrap();
        let manifest = root.join("SHA512SUM");
        fs::write(
            &manifest,
            format!(
                "{}  a.txt\n{}  b.txt\n",
                digest_bytes(b"hi"),
                &EMPTY_DIGEST[..64]
            ),
        )
        .unwrap();

        let mut db = HashDatabase::new(&root, DB);
        let report = import_manifest(&mut db, &manifest).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(db.len(), 1);

        let entry = db.get(&root.join("a.txt")).unwrap();
        assert_eq!(entry.digest.as_deref(), Some(digest_bytes(b"hi").as_str()));
        assert_eq!(entry.size, Some(2));
    }

    #[test]
    fn import_resolves_relative_to_manifest_directory() {
        let (_tmp, root) = fixture();
        fs::create_dir(root.join("sub")).unwrap();
        let manifest = root.join("sub").join("files.sha512sum");
        fs::write(&manifest, format!("{EMPTY_DIGEST} *gone.bin\n")).unwrap();

        let mut db = HashDatabase::new(&root, DB);
        let report = import_manifest(&mut db, &manifest).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.missing_targets, 1);

        let entry = db.get(&root.join("sub").join("gone.bin")).unwrap();
        assert_eq!(entry.size, None);
        assert_eq!(entry.kind, None);
        assert_eq!(entry.digest.as_deref(), Some(EMPTY_DIGEST));
    }

    #[test]
    fn import_counts_paths_outside_root() {
        let (_tmp, root) = fixture();
        fs::create_dir(root.join("inner")).unwrap();
        let manifest = root.join("inner").join("SHA512SUMS");
        fs::write(&manifest, format!("{EMPTY_DIGEST}  ../escape.txt\n")).unwrap();

        let mut db = HashDatabase::new(&root.join("inner"), DB);
        let report = import_manifest(&mut db, &manifest).unwrap();
        assert_eq!(report.imported, 0);
        assert_eq!(report.outside_root, 1);
        assert!(db.is_empty());
    }

    #[test]
    fn discovery_matches_names_and_suffixes() {
        let (_tmp, root) = fixture();
        fs::create_dir_all(root.join("a/b")).unwrap();
        for name in ["SHA512SUM", "a/SHA512SUMS", "a/b/disk.img.sha512", "a/notes.txt"] {
            fs::write(root.join(name), "").unwrap();
        }

        let found = discover_manifests(&root, &Config::default().manifest, 2).unwrap();
        assert_eq!(
            found,
            vec![
                root.join("SHA512SUM"),
                root.join("a/SHA512SUMS"),
                root.join("a/b/disk.img.sha512"),
            ]
        );
    }

    #[test]
    fn export_then_import_yields_same_digests() {
        let (_tmp, root) = fixture();
        fs::create_dir(root.join("d")).unwrap();
        fs::write(root.join("d/one"), "1").unwrap();
        fs::write(root.join("two"), "22").unwrap();
        fs::write(root.join("empty"), "").unwrap();

        let mut db = HashDatabase::new(&root, DB);
        db.update(1, &HashEngine::new(2)).unwrap();
        let exported = export_manifest(&db, "SHA512SUM").unwrap();
        assert_eq!(exported.written, 3);

        let text = fs::read_to_string(&exported.path).unwrap();
        let names: Vec<&str> = text.lines().map(|l| &l[130..]).collect();
        assert_eq!(names, vec!["d/one", "empty", "two"]);

        let mut fresh = HashDatabase::new(&root, DB);
        import_manifest(&mut fresh, &exported.path).unwrap();
        let digests = |db: &HashDatabase| -> Vec<(PathBuf, Option<String>)> {
            db.entries()
                .iter()
                .map(|(p, e)| (p.clone(), e.digest.clone()))
                .collect()
        };
        assert_eq!(digests(&fresh), digests(&db));
    }

    #[cfg(unix)]
    #[test]
    fn unusual_names_survive_export_and_import() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt as _;

        let (_tmp, root) = fixture();
        let backslash = root.join("a\\b.txt");
        let non_utf8 = root.join(OsStr::from_bytes(b"bad-\xff.txt"));
        fs::write(&backslash, "slash").unwrap();
        fs::write(&non_utf8, "bytes").unwrap();
        fs::write(root.join("plain"), "p").unwrap();

        let mut db = HashDatabase::new(&root, DB);
        db.update(1, &HashEngine::new(2)).unwrap();
        let exported = export_manifest(&db, "SHA512SUM").unwrap();

        let text = fs::read_to_string(&exported.path).unwrap();
        let escaped: Vec<&str> = text.lines().filter(|l| l.starts_with('\\')).collect();
        assert_eq!(escaped.len(), 2);
        assert!(text.lines().any(|l| l.ends_with("  plain") && !l.starts_with('\\')));

        let mut fresh = HashDatabase::new(&root, DB);
        let report = import_manifest(&mut fresh, &exported.path).unwrap();
        assert_eq!((report.imported, report.skipped), (3, 0));
        assert_eq!(
            fresh.get(&backslash).unwrap().digest,
            db.get(&backslash).unwrap().digest
        );
        assert_eq!(
            fresh.get(&non_utf8).unwrap().digest,
            db.get(&non_utf8).unwrap().digest
        );
        assert_eq!(fresh.get(&non_utf8).unwrap().size, Some(5));
    }
}

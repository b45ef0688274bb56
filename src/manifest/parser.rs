//! Line parser for `sha512sum`-style checksum manifests.

#![allow(missing_docs)]

use std::sync::LazyLock;

use regex::Regex;

use crate::hashing::digest::is_valid_digest;

/// Optional `\` escape marker + `<hex>` + space + (space | `*`) + path. Hex
/// length is checked separately so a wrong-length token is skipped rather
/// than misparsed.
static LINE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\\)?([0-9A-Fa-f]+) [ *](.+)$").ok());

/// One accepted manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLine {
    /// Lowercase hex digest.
    pub digest: String,
    /// Path as written, relative to the manifest's directory.
    pub path: String,
    /// The line started with `\`: `path` carries backslash escapes.
    pub escaped: bool,
}

/// Accepted lines plus the count of malformed ones.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedManifest {
    pub lines: Vec<ManifestLine>,
    pub skipped: usize,
}

/// Parse one line; `None` for anything malformed.
#[must_use]
pub fn parse_line(line: &str) -> Option<ManifestLine> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let caps = LINE_RE.as_ref()?.captures(line)?;
    let digest = caps.get(2)?.as_str();
    if !is_valid_digest(digest) {
        return None;
    }
    Some(ManifestLine {
        digest: digest.to_ascii_lowercase(),
        path: caps.get(3)?.as_str().to_string(),
        escaped: caps.get(1).is_some(),
    })
}

/// Parse a whole manifest. Blank lines are ignored, not counted.
#[must_use]
pub fn parse_manifest(content: &str) -> ParsedManifest {
    let mut parsed = ParsedManifest::default();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(entry) => parsed.lines.push(entry),
            None => parsed.skipped += 1,
        }
    }
    parsed
}

/// Render one manifest line, newline included.
///
/// `path` is already escaped; a path containing escapes gets the leading `\`
/// marker, as `sha512sum` writes it.
#[must_use]
pub fn format_line(digest: &str, path: &str) -> String {
    let marker = if path.contains('\\') { "\\" } else { "" };
    format!("{marker}{digest}  {path}\n")
}

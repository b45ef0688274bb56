//! Shared path manipulation utilities.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = absolute_path(path);

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

/// Make a path absolute and syntactically normalized without following the
/// final component.
///
/// Tracked entries are symlinks themselves, so the last component must never
/// be resolved; only the parent directory is canonicalized.
pub fn resolve_entry_path(path: &Path) -> PathBuf {
    let absolute = normalize_syntactic(&absolute_path(path));
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => resolve_absolute_path(parent).join(name),
        _ => absolute,
    }
}

/// Express `path` relative to `root`, if it lies under it.
pub fn relative_to<'a>(path: &'a Path, root: &Path) -> Option<&'a Path> {
    path.strip_prefix(root).ok()
}

/// Convert a path string from a checksum manifest to the host convention.
///
/// Manifests written on Windows use `\`; everywhere else `/` is the separator.
pub fn normalize_separators(raw: &str) -> PathBuf {
    if std::path::MAIN_SEPARATOR == '/' {
        PathBuf::from(raw.replace('\\', "/"))
    } else {
        PathBuf::from(raw.replace('/', std::path::MAIN_SEPARATOR_STR))
    }
}

/// Encode a root-relative path as a persisted key.
///
/// Components are joined with `/` and each one is passed through
/// [`escape_name`], so [`decode_key`] restores the exact OS name.
pub fn encode_key(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(escape_name(part)),
            _ => None,
        })
        .collect();
    parts.join("/")
}

/// Decode a key written by [`encode_key`].
///
/// `None` if the key is empty, climbs with `..`, is absolute, or names a
/// component that would not survive as a single path segment.
pub fn decode_key(key: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for part in key.split('/') {
        if part == "." {
            continue;
        }
        let name = unescape_name(part)?;
        let mut components = Path::new(&name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(single)), None) if single == name.as_os_str() => {
                relative.push(single);
            }
            _ => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Escape an OS name into printable UTF-8.
///
/// `\` becomes `\\`, line breaks become `\n` and `\r`, and bytes that are not
/// UTF-8 become `\xHH`. Every other character is kept as is.
pub fn escape_name(name: &OsStr) -> String {
    let mut out = String::with_capacity(name.len());
    for chunk in name.as_encoded_bytes().utf8_chunks() {
        for ch in chunk.valid().chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                _ => out.push(ch),
            }
        }
        for byte in chunk.invalid() {
            let _ = write!(out, "\\x{byte:02x}");
        }
    }
    out
}

/// Reverse [`escape_name`].
///
/// A backslash that does not start a known escape is kept literally. `None`
/// only where the host cannot represent the decoded bytes.
pub fn unescape_name(escaped: &str) -> Option<OsString> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let (decoded, width) = match bytes.get(i + 1) {
            Some(b'\\') => (b'\\', 2),
            Some(b'n') => (b'\n', 2),
            Some(b'r') => (b'\r', 2),
            Some(b'x') => match (
                bytes.get(i + 2).and_then(|b| hex_value(*b)),
                bytes.get(i + 3).and_then(|b| hex_value(*b)),
            ) {
                (Some(high), Some(low)) => ((high << 4) | low, 4),
                _ => (b'\\', 1),
            },
            _ => (b'\\', 1),
        };
        out.push(decoded);
        i += width;
    }
    os_string_from_bytes(out)
}

fn hex_value(byte: u8) -> Option<u8> {
    char::from(byte)
        .to_digit(16)
        .and_then(|digit| u8::try_from(digit).ok())
}

#[cfg(unix)]
#[allow(clippy::unnecessary_wraps)]
fn os_string_from_bytes(bytes: Vec<u8>) -> Option<OsString> {
    use std::os::unix::ffi::OsStringExt as _;
    Some(OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn os_string_from_bytes(bytes: Vec<u8>) -> Option<OsString> {
    String::from_utf8(bytes).ok().map(OsString::from)
}

/// Render a root-relative path with `/` separators for display.
///
/// Lossy for names that are not UTF-8; persisted formats use [`encode_key`].
pub fn portable_string(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    parts.join("/")
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    }
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

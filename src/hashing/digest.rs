//! SHA-512 content digests for files and symlinks.

use std::fs::{self, File};
use std::path::Path;

use memmap2::Mmap;
use sha2::{Digest, Sha512};

use crate::core::errors::{HdbError, Result};
use crate::database::entry::{EntryKind, FileMetadata};

/// Length of a hex-encoded SHA-512 digest.
pub const DIGEST_HEX_LEN: usize = 128;

/// SHA-512 of zero bytes. Zero-length files are never mapped.
pub const EMPTY_DIGEST: &str = "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce\
                                47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e";

/// Hex SHA-512 of an in-memory buffer.
pub fn digest_bytes(data: &[u8]) -> String {
    hex_encode(&Sha512::digest(data))
}

/// Whether `token` looks like a hex SHA-512 digest.
pub fn is_valid_digest(token: &str) -> bool {
    token.len() == DIGEST_HEX_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Digest the content of a regular file through a read-only mapping.
pub fn digest_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| HdbError::io(path, e))?;
    let len = file.metadata().map_err(|e| HdbError::io(path, e))?.len();
    if len == 0 {
        return Ok(EMPTY_DIGEST.to_string());
    }

    let mmap = map_readonly(&file).map_err(|e| HdbError::io(path, e))?;
    Ok(digest_bytes(&mmap))
}

/// Digest the raw bytes of a symlink's target string.
///
/// The OS-encoded bytes are used as-is so targets that are not valid UTF-8
/// still hash deterministically.
pub fn digest_symlink(path: &Path) -> Result<String> {
    let target = fs::read_link(path).map_err(|e| HdbError::io(path, e))?;
    Ok(digest_bytes(target.as_os_str().as_encoded_bytes()))
}

/// `lstat` a path and digest it according to its live type.
///
/// Returns the metadata observed before hashing together with the digest.
pub fn digest_path(path: &Path) -> Result<(FileMetadata, String)> {
    let meta = FileMetadata::read(path)
        .map_err(|e| HdbError::io(path, e))?
        .ok_or_else(|| HdbError::HashFailure {
            path: path.to_path_buf(),
            details: "not a regular file or symlink".to_string(),
        })?;

    let digest = match meta.kind {
        EntryKind::RegularFile if meta.size == 0 => EMPTY_DIGEST.to_string(),
        EntryKind::RegularFile => digest_file(path)?,
        EntryKind::Symlink => digest_symlink(path)?,
    };
    Ok((meta, digest))
}

#[allow(unsafe_code)]
fn map_readonly(file: &File) -> std::io::Result<Mmap> {
    // SAFETY: the mapping is read-only and dropped before this call's caller
    // returns. Concurrent truncation by another process can raise SIGBUS; that
    // race is accepted the same way any reader of a mutating file accepts it.
    unsafe { Mmap::map(file) }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

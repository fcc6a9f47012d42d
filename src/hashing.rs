//! Line-ending-insensitive content hashing
//!
//! Identical content must hash identically regardless of origin: an editor
//! save on Windows (CRLF), a tool write (LF) and a disk read must all agree.
//! Before hashing, line endings are therefore normalized to LF. Nothing else
//! is touched — trailing whitespace and the trailing newline are preserved,
//! so POSIX "file ends with newline" semantics survive the comparison.
//!
//! Hashes are SHA-256 rendered as 64 lowercase hex characters, making
//! collisions a non-concern for conflict detection.
//!
//! ## Example
//!
//! ```rust
//! use itervault::hashing::hash_content;
//!
//! let lf = hash_content("R1 1 2 10k\nR2 2 0 4.7k\n");
//! let crlf = hash_content("R1 1 2 10k\r\nR2 2 0 4.7k\r\n");
//! assert_eq!(lf, crlf);
//! ```

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Normalize line endings to LF (`\r\n` → `\n`, lone `\r` → `\n`)
///
/// Trailing whitespace and the trailing newline are intentionally kept.
/// Returns a borrowed `Cow` when the content contains no `\r` at all,
/// which is the common case for tool-written files.
pub fn normalize_line_endings(content: &str) -> Cow<'_, str> {
    if !content.contains('\r') {
        return Cow::Borrowed(content);
    }
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Hash text content after line-ending normalization
///
/// Returns the SHA-256 digest of the normalized UTF-8 bytes as a
/// 64-character lowercase hex string.
pub fn hash_content(content: &str) -> String {
    hash_bytes(normalize_line_endings(content).as_bytes())
}

/// Hash raw bytes without any normalization
///
/// Used for binary content where line endings have no meaning.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash a file's content, normalized like [`hash_content`]
///
/// Returns `Ok(None)` if the file does not exist or is not valid UTF-8 —
/// a missing or undecodable file is an expected condition for the version
/// tracker, not an error. Other I/O failures propagate.
pub fn hash_file(path: &Path) -> Result<Option<String>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match std::str::from_utf8(&bytes) {
        Ok(text) => Ok(Some(hash_content(text))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_line_ending_variants_hash_equal() {
        let lf = "R1 1 2 10k\nR2 2 0 4.7k\n";
        let crlf = "R1 1 2 10k\r\nR2 2 0 4.7k\r\n";
        let cr = "R1 1 2 10k\rR2 2 0 4.7k\r";
        assert_eq!(hash_content(lf), hash_content(crlf));
        assert_eq!(hash_content(lf), hash_content(cr));
    }

    #[test]
    fn test_trailing_newline_is_significant() {
        assert_ne!(hash_content("R1 1k\n"), hash_content("R1 1k"));
    }

    #[test]
    fn test_trailing_whitespace_is_significant() {
        assert_ne!(hash_content("R1 1k  \n"), hash_content("R1 1k\n"));
    }

    #[test]
    fn test_normalize_borrows_when_clean() {
        assert!(matches!(
            normalize_line_endings("no carriage returns\n"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn test_hash_file_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        let result = hash_file(&tmp.path().join("absent.cir")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_hash_file_matches_content_hash() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.cir");
        std::fs::write(&path, "V1 1 0 DC 5\r\n").unwrap();
        assert_eq!(
            hash_file(&path).unwrap().unwrap(),
            hash_content("V1 1 0 DC 5\n")
        );
    }

    #[test]
    fn test_hash_file_binary_is_none() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob.bin");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        assert!(hash_file(&path).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_crlf_variant_hashes_equal(lines in proptest::collection::vec("[a-zA-Z0-9 .]{0,20}", 0..8)) {
            let lf = lines.join("\n");
            let crlf = lines.join("\r\n");
            let cr = lines.join("\r");
            prop_assert_eq!(hash_content(&lf), hash_content(&crlf));
            prop_assert_eq!(hash_content(&lf), hash_content(&cr));
        }

        #[test]
        fn prop_hash_is_deterministic(s in ".{0,64}") {
            prop_assert_eq!(hash_content(&s), hash_content(&s));
            prop_assert_eq!(hash_content(&s).len(), 64);
        }
    }
}

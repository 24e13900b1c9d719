//! Payload hash validation.
//!
//! Manifests carry base64 digests keyed by algorithm name. Only SHA-256 is
//! supported; a file is valid if it matches the first supported digest.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use du_agent_workflow::FileHash;
use sha2::{Digest, Sha256};

use crate::error::{HandlerError, Result};

const SHA256: &str = "sha256";

/// Base64 SHA-256 digest of the file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn sha256_base64(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(STANDARD.encode(hasher.finalize()))
}

/// Base64 SHA-256 digest of `data`.
#[must_use]
pub fn sha256_base64_bytes(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// Check the file at `path` against `hashes`.
///
/// # Errors
///
/// Returns `HandlerError::NoHashes` if `hashes` is empty,
/// `HandlerError::UnsupportedHashType` if no algorithm is supported, or an
/// I/O error if the file cannot be read.
pub fn is_valid(path: &Path, file_id: &str, hashes: &[FileHash]) -> Result<bool> {
    let first = hashes
        .first()
        .ok_or_else(|| HandlerError::NoHashes(file_id.to_string()))?;
    let expected = hashes
        .iter()
        .find(|h| h.alg.eq_ignore_ascii_case(SHA256))
        .ok_or_else(|| HandlerError::UnsupportedHashType(first.alg.clone()))?;

    let actual = sha256_base64(path)?;
    if actual != expected.value {
        tracing::warn!(
            file_id,
            path = %path.display(),
            expected = %expected.value,
            actual = %actual,
            "Hash mismatch"
        );
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sha256(value: &str) -> Vec<FileHash> {
        vec![FileHash {
            alg: "sha256".to_string(),
            value: value.to_string(),
        }]
    }

    #[test]
    fn known_digest() {
        // sha256("hello")
        assert_eq!(
            sha256_base64_bytes(b"hello"),
            "LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ="
        );
    }

    #[test]
    fn validates_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"hello").unwrap();

        let good = sha256(&sha256_base64_bytes(b"hello"));
        let bad = sha256(&sha256_base64_bytes(b"other"));
        assert!(is_valid(&path, "f1", &good).unwrap());
        assert!(!is_valid(&path, "f1", &bad).unwrap());
    }

    #[test]
    fn rejects_missing_and_unsupported_hashes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"x").unwrap();

        assert!(matches!(
            is_valid(&path, "f1", &[]),
            Err(HandlerError::NoHashes(_))
        ));

        let md5 = vec![FileHash {
            alg: "md5".to_string(),
            value: "abc".to_string(),
        }];
        assert!(matches!(
            is_valid(&path, "f1", &md5),
            Err(HandlerError::UnsupportedHashType(alg)) if alg == "md5"
        ));
    }
}

//! Checksum algorithms declared by repository metadata.
//!
//! Metadata documents name an algorithm (`md5`, `sha1`, `sha256`, `sha512`)
//! alongside a hex digest. [`Checksum`] keeps both halves together so a
//! digest can never travel without the algorithm that produced it.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Algorithm assumed when a metadata checksum element carries no `type`.
pub const DEFAULT_CHECKSUM_TYPE: ChecksumType = ChecksumType::Sha256;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Errors raised while interpreting checksum attributes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecksumError {
    /// Algorithm name not recognised.
    #[error("unsupported checksum type '{0}'")]
    UnsupportedType(String),

    /// Digest is not hex of the expected length for the algorithm.
    #[error("invalid {checksum_type} digest '{value}'")]
    InvalidDigest {
        /// Algorithm the digest was declared for.
        checksum_type: ChecksumType,
        /// Offending digest text.
        value: String,
    },
}

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumType {
    /// Stable lowercase name, also used as the store directory name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoded digest.
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumType {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            // yum wrote plain "sha" for sha1 in older repositories
            "sha" | "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(ChecksumError::UnsupportedType(other.to_string())),
        }
    }
}

/// An algorithm plus its lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    checksum_type: ChecksumType,
    value: String,
}

impl Checksum {
    /// Builds a checksum, validating and lowercasing the hex digest.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::InvalidDigest`] if `value` is not hex of the
    /// length `checksum_type` produces.
    pub fn new(checksum_type: ChecksumType, value: &str) -> Result<Self, ChecksumError> {
        let value = value.trim().to_ascii_lowercase();
        if value.len() != checksum_type.hex_len() || !value.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(ChecksumError::InvalidDigest {
                checksum_type,
                value,
            });
        }
        Ok(Self {
            checksum_type,
            value,
        })
    }

    /// Parses a `(type, value)` attribute pair, defaulting the type when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError`] for an unknown algorithm or malformed digest.
    pub fn from_attributes(
        checksum_type: Option<&str>,
        value: &str,
    ) -> Result<Self, ChecksumError> {
        let checksum_type = match checksum_type {
            Some(name) => name.parse()?,
            None => DEFAULT_CHECKSUM_TYPE,
        };
        Self::new(checksum_type, value)
    }

    #[must_use]
    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }

    /// Lowercase hex digest.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.checksum_type, self.value)
    }
}

/// Incremental hasher for any [`ChecksumType`].
pub enum ChecksumHasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl ChecksumHasher {
    #[must_use]
    pub fn new(checksum_type: ChecksumType) -> Self {
        match checksum_type {
            ChecksumType::Md5 => Self::Md5(Md5::new()),
            ChecksumType::Sha1 => Self::Sha1(Sha1::new()),
            ChecksumType::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumType::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Md5(h) => h.update(chunk),
            Self::Sha1(h) => h.update(chunk),
            Self::Sha256(h) => h.update(chunk),
            Self::Sha512(h) => h.update(chunk),
        }
    }

    /// Consumes the hasher and returns the lowercase hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hashes an on-disk file with the given algorithm.
///
/// # Errors
///
/// Returns the underlying I/O error if the file cannot be read.
pub async fn digest_file(path: &Path, checksum_type: ChecksumType) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = ChecksumHasher::new(checksum_type);
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize_hex())
}

/// Returns `true` when the file at `path` hashes to `expected`.
///
/// # Errors
///
/// Returns the underlying I/O error if the file cannot be read.
pub async fn verify_file(path: &Path, expected: &Checksum) -> std::io::Result<bool> {
    Ok(digest_file(path, expected.checksum_type()).await? == expected.value())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_checksum_type_parses_known_names() {
        assert_eq!("md5".parse::<ChecksumType>().unwrap(), ChecksumType::Md5);
        assert_eq!("SHA256".parse::<ChecksumType>().unwrap(), ChecksumType::Sha256);
        assert_eq!("sha512".parse::<ChecksumType>().unwrap(), ChecksumType::Sha512);
    }

    #[test]
    fn test_checksum_type_legacy_sha_is_sha1() {
        assert_eq!("sha".parse::<ChecksumType>().unwrap(), ChecksumType::Sha1);
    }

    #[test]
    fn test_checksum_type_rejects_unknown() {
        let err = "crc32".parse::<ChecksumType>().unwrap_err();
        assert_eq!(err, ChecksumError::UnsupportedType("crc32".to_string()));
    }

    #[test]
    fn test_checksum_new_lowercases_digest() {
        let checksum = Checksum::new(ChecksumType::Sha256, &HELLO_SHA256.to_uppercase()).unwrap();
        assert_eq!(checksum.value(), HELLO_SHA256);
    }

    #[test]
    fn test_checksum_new_rejects_wrong_length() {
        let result = Checksum::new(ChecksumType::Sha256, "abcd");
        assert!(matches!(result, Err(ChecksumError::InvalidDigest { .. })));
    }

    #[test]
    fn test_checksum_new_rejects_non_hex() {
        let bogus = "z".repeat(32);
        assert!(Checksum::new(ChecksumType::Md5, &bogus).is_err());
    }

    #[test]
    fn test_from_attributes_defaults_to_sha256() {
        let checksum = Checksum::from_attributes(None, HELLO_SHA256).unwrap();
        assert_eq!(checksum.checksum_type(), DEFAULT_CHECKSUM_TYPE);
        assert_eq!(checksum.checksum_type(), ChecksumType::Sha256);
    }

    #[test]
    fn test_hasher_matches_known_digests() {
        let mut hasher = ChecksumHasher::new(ChecksumType::Sha256);
        hasher.update(b"hel");
        hasher.update(b"lo");
        assert_eq!(hasher.finalize_hex(), HELLO_SHA256);

        let mut hasher = ChecksumHasher::new(ChecksumType::Md5);
        hasher.update(b"hello");
        assert_eq!(hasher.finalize_hex(), "5d41402abc4b2a76b9719d911017c592");

        let mut hasher = ChecksumHasher::new(ChecksumType::Sha1);
        hasher.update(b"hello");
        assert_eq!(
            hasher.finalize_hex(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[tokio::test]
    async fn test_verify_file_detects_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();

        let good = Checksum::new(ChecksumType::Sha256, HELLO_SHA256).unwrap();
        assert!(verify_file(&path, &good).await.unwrap());

        std::fs::write(&path, b"hellO").unwrap();
        assert!(!verify_file(&path, &good).await.unwrap());
    }
}

//! Trait definitions for the artifact module.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::error::ArtifactError;

/// Longest accepted object key.
pub const MAX_KEY_LEN: usize = 1024;

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-/ ]*$").unwrap());

/// Check object key syntax: relative, no `..` segments, no empty segments,
/// a conservative character set.
pub fn validate_key(key: &str) -> Result<(), ArtifactError> {
    let invalid = || ArtifactError::InvalidKey {
        key: key.to_string(),
    };

    if key.is_empty() || key.len() > MAX_KEY_LEN || !KEY_PATTERN.is_match(key) {
        return Err(invalid());
    }
    if key.ends_with('/') || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(invalid());
    }
    Ok(())
}

/// An object store holding input and output documents.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Returns the name of this store implementation.
    fn name(&self) -> &str;

    /// Fetch the bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Store `bytes` under `key`, returning the reference clients should use.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, ArtifactError>;

    /// Whether an object exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, ArtifactError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        for key in [
            "papers/123/source.pdf",
            "a.pdf",
            "jobs/abc-def/0/translated_mono.pdf",
            "uploads/My Paper v2.pdf",
        ] {
            assert!(validate_key(key).is_ok(), "{} should be valid", key);
        }
    }

    #[test]
    fn test_invalid_keys() {
        for key in [
            "",
            "/etc/passwd",
            "../secret.pdf",
            "papers/../../x.pdf",
            "papers//x.pdf",
            "papers/",
            "./x.pdf",
            "papers/x.pdf?y=1",
            "papers\\x.pdf",
        ] {
            assert!(validate_key(key).is_err(), "{} should be invalid", key);
        }
        assert!(validate_key(&"a".repeat(MAX_KEY_LEN + 1)).is_err());
    }
}

//! Error types for the artifact module.

use thiserror::Error;

use crate::retry::Transient;

/// Errors from object store operations.
#[derive(Debug, Clone, Error)]
pub enum ArtifactError {
    /// No object stored under the key.
    #[error("Artifact not found: {key}")]
    NotFound { key: String },

    /// The store refused access.
    #[error("Access denied for artifact: {key}")]
    PermissionDenied { key: String },

    /// Key is empty, absolute, or escapes the store root.
    #[error("Invalid artifact key: {key}")]
    InvalidKey { key: String },

    /// Timeout, connection failure, or a 5xx-equivalent response.
    #[error("Object store unavailable: {reason}")]
    Unavailable { reason: String },

    /// Any other backend failure.
    #[error("Object store error: {reason}")]
    Backend { reason: String },
}

impl ArtifactError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }

    /// Map an I/O error on `key` into the taxonomy.
    pub fn from_io(key: &str, e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => Self::NotFound {
                key: key.to_string(),
            },
            ErrorKind::PermissionDenied => Self::PermissionDenied {
                key: key.to_string(),
            },
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                Self::unavailable(format!("{}: {}", key, e))
            }
            _ => Self::backend(format!("{}: {}", key, e)),
        }
    }
}

impl Transient for ArtifactError {
    fn is_transient(&self) -> bool {
        matches!(self, ArtifactError::Unavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(ArtifactError::unavailable("timeout").is_transient());
        assert!(!ArtifactError::backend("disk full").is_transient());
        assert!(!ArtifactError::NotFound {
            key: "a".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_from_io_maps_kinds() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            ArtifactError::from_io("a.pdf", not_found),
            ArtifactError::NotFound { .. }
        ));

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(ArtifactError::from_io("a.pdf", timed_out).is_transient());
    }
}

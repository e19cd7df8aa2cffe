//! Error types for the engine module.

use thiserror::Error;

use crate::job::ErrorClass;

/// Errors reported by a translation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine failed; running it again may succeed.
    #[error("Engine failed: {reason}")]
    Failed { reason: String },

    /// The engine flagged the document itself as unprocessable.
    #[error("Input rejected by engine: {reason}")]
    Unprocessable { reason: String },

    /// The engine binary or library could not be started.
    #[error("Engine unavailable: {reason}")]
    Unavailable { reason: String },

    /// I/O error around the engine call.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn unprocessable(reason: impl Into<String>) -> Self {
        Self::Unprocessable {
            reason: reason.into(),
        }
    }

    /// Only an explicit content-level rejection is fatal.
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Unprocessable { .. } => ErrorClass::Fatal,
            _ => ErrorClass::Retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(EngineError::failed("oom").class(), ErrorClass::Retryable);
        assert_eq!(
            EngineError::unprocessable("encrypted pdf").class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            EngineError::Unavailable {
                reason: "missing".to_string()
            }
            .class(),
            ErrorClass::Retryable
        );
    }
}

//! Error taxonomy for generation sessions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("shape mismatch in {component}: expected {expected}, got {actual}")]
    ShapeMismatch {
        component: &'static str,
        expected: String,
        actual: String,
    },

    #[error("kv cache counter {cache} does not match session cursor {cursor}")]
    StateDesync { cache: usize, cursor: usize },

    #[error("context overflow: window of {len} at position {start} exceeds context length {context_length}")]
    ContextOverflow {
        start: usize,
        len: usize,
        context_length: usize,
    },

    #[error("vocab head did not return shard {index} of {expected}")]
    ShardMissing { index: usize, expected: usize },

    #[error("invalid sampler configuration: {0}")]
    SamplerConfig(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session {0} not found")]
    UnknownSession(u64),

    #[error("session {0} failed earlier and must be recreated")]
    SessionPoisoned(u64),

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub(crate) fn shape(
        component: &'static str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::ShapeMismatch {
            component,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Every error except running out of context aborts the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, OrchestratorError::ContextOverflow { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::StateDesync {
            cache: 3,
            cursor: 4,
        };
        assert_eq!(
            err.to_string(),
            "kv cache counter 3 does not match session cursor 4"
        );

        let err = OrchestratorError::ShardMissing {
            index: 7,
            expected: 16,
        };
        assert_eq!(err.to_string(), "vocab head did not return shard 7 of 16");

        let err = OrchestratorError::shape("embedder", "[1, 4, 64]", "[1, 3, 64]");
        assert_eq!(
            err.to_string(),
            "shape mismatch in embedder: expected [1, 4, 64], got [1, 3, 64]"
        );
    }

    #[test]
    fn only_context_overflow_is_non_fatal() {
        let overflow = OrchestratorError::ContextOverflow {
            start: 511,
            len: 2,
            context_length: 512,
        };
        assert!(!overflow.is_fatal());
        assert!(OrchestratorError::SamplerConfig("t".into()).is_fatal());
        assert!(OrchestratorError::from(anyhow::anyhow!("device lost")).is_fatal());
    }
}

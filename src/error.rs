//! Engine error taxonomy
//!
//! Errors carry their own retry classification so callers never have to
//! infer it from message text. Deterministic learner-code outcomes (wrong
//! answer, TLE, ...) are verdicts, not errors, and never appear here.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the grading engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown language identifier (terminal, caller mistake)
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// A grading request must carry at least one test case
    #[error("no test cases supplied")]
    NoTestCases,

    /// A grading pass for this submission is already in flight
    #[error("grading already in progress for submission {0}")]
    AlreadyGrading(i64),

    /// No sandbox slot freed within the wait budget
    #[error("sandbox pool exhausted after {0:?}")]
    PoolTimeout(Duration),

    /// Sandbox could not be provisioned (work dir, stdin staging, ...)
    #[error("sandbox provisioning failed: {0}")]
    Provision(String),

    /// Child process could not be spawned or awaited
    #[error("process spawn failed: {0}")]
    Spawn(String),

    /// Anything else that is not the learner's fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the operation may succeed on a retry.
    ///
    /// Only infrastructure failures qualify; configuration and caller
    /// errors are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::PoolTimeout(_) | EngineError::Provision(_) | EngineError::Spawn(_)
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Provision(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_errors_are_retryable() {
        assert!(EngineError::PoolTimeout(Duration::from_secs(1)).is_retryable());
        assert!(EngineError::Provision("tempdir".into()).is_retryable());
        assert!(EngineError::Spawn("enoent".into()).is_retryable());
    }

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        assert!(!EngineError::UnsupportedLanguage("cobol".into()).is_retryable());
        assert!(!EngineError::NoTestCases.is_retryable());
        assert!(!EngineError::AlreadyGrading(7).is_retryable());
        assert!(!EngineError::Internal("bug".into()).is_retryable());
    }
}

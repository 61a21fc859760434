//! Crate-level error type for the orchestration kernel.
//!
//! Unlike the layers above it, the kernel never wraps errors in a
//! report/context chain: it runs no I/O of its own, so there is no call
//! chain worth annotating. Callers in `taskwright-runtime` that need richer
//! context attach it themselves before surfacing a [`StructuredError`] to
//! the supervisor.
//!
//! [`StructuredError`]: crate::contracts::StructuredError

use thiserror::Error;

use crate::contracts::ErrorCategory;

/// Crate-level error type for the orchestration kernel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// A task references a dependency id that does not exist in the DAG.
    #[error("task '{task}' depends on unknown task '{missing}'")]
    UnknownDependency { task: String, missing: String },

    /// Adding an edge would introduce a cycle in the task graph.
    #[error("cycle detected in task graph: {path}")]
    CycleDetected { path: String },

    /// A task id was inserted twice into the same DAG.
    #[error("duplicate task id '{0}'")]
    DuplicateTask(String),

    /// A task id was looked up but is not present in the DAG.
    #[error("no such task '{0}'")]
    TaskNotFound(String),

    /// Configuration could not be read or parsed.
    #[cfg(feature = "config")]
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error, surfaced without the `config` feature too
    /// since task checkpoints may be loaded from disk by callers.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A value failed validation against an invariant (e.g. a negative
    /// timeout, an out-of-range confidence threshold).
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// An internal invariant was violated; should not occur in correct
    /// callers but is surfaced rather than panicking.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

impl KernelError {
    /// Coarse-grained classification used by the supervisor to pick a
    /// recovery strategy without string-matching on the display text.
    pub fn category(&self) -> ErrorCategory {
        match self {
            KernelError::UnknownDependency { .. }
            | KernelError::CycleDetected { .. }
            | KernelError::DuplicateTask(_) => ErrorCategory::Planning,
            KernelError::TaskNotFound(_) => ErrorCategory::Planning,
            KernelError::Config(_) => ErrorCategory::Configuration,
            KernelError::Io(_) => ErrorCategory::Io,
            KernelError::InvalidValue { .. } => ErrorCategory::Configuration,
            KernelError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether retrying the same operation unchanged has any chance of
    /// succeeding. Structural errors (cycles, unknown deps) never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KernelError::Io(_))
    }

    /// Whether this error should abort the whole run rather than just the
    /// task that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KernelError::CycleDetected { .. } | KernelError::Internal(_)
        )
    }

    /// Rough severity, mirroring [`crate::contracts::HealthStatus`]'s
    /// three-level scale, for log-level selection.
    pub fn severity(&self) -> &'static str {
        if self.is_fatal() {
            "critical"
        } else if self.is_retryable() {
            "degraded"
        } else {
            "error"
        }
    }
}

/// Convenience result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_is_fatal_and_not_retryable() {
        let err = KernelError::CycleDetected {
            path: "a -> b -> a".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Planning);
    }

    #[test]
    fn io_error_is_retryable() {
        let err = KernelError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "x"));
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert_eq!(err.severity(), "degraded");
    }

    #[test]
    fn unknown_dependency_message() {
        let err = KernelError::UnknownDependency {
            task: "b".into(),
            missing: "a".into(),
        };
        assert_eq!(err.to_string(), "task 'b' depends on unknown task 'a'");
    }
}

//! Error types shared by the library, the helper, and the CLI.

use thiserror::Error;

/// Result type for shim operations.
pub type ShimResult<T> = Result<T, ShimError>;

/// Errors that can occur while driving the child container.
#[derive(Debug, Error)]
pub enum ShimError {
    /// An explicitly requested image could not be pulled or inspected.
    #[error("image {reference} is unavailable: {message}")]
    ImageUnavailable { reference: String, message: String },

    /// No container matching the parent name exists to inherit an image from.
    #[error("parent container {0} not found, cannot initialize shim child")]
    ParentNotFound(String),

    /// Creating, renaming or starting the child container failed.
    #[error("failed to create child container {name}: {message}")]
    ContainerCreateFailed { name: String, message: String },

    /// An existing container was found but does not match the configuration.
    #[error("container {name} is not usable as a shim child: {reason}")]
    ContainerIncompatible { name: String, reason: String },

    /// The helper reported failure on stderr or with a non-zero exit code.
    #[error("command failed{}: {stderr}", .exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
    ExecFailed {
        stderr: String,
        exit_code: Option<i64>,
    },

    /// The exec transport failed mid-stream.
    #[error("exec stream error: {0}")]
    Stream(String),

    /// The helper produced output that could not be decoded.
    #[error("invalid helper output: {0}")]
    InvalidOutput(String),

    /// The container runtime rejected a request.
    #[error("runtime error during {operation}: {message}")]
    Runtime {
        operation: &'static str,
        message: String,
    },

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShimError {
    /// Shorthand for a runtime failure tagged with the failing operation.
    pub fn runtime(operation: &'static str, err: impl std::fmt::Display) -> Self {
        ShimError::Runtime {
            operation,
            message: err.to_string(),
        }
    }

    /// Whether this error was reported by the helper itself rather than by
    /// the runtime or the transport.
    pub fn is_exec_failure(&self) -> bool {
        matches!(self, ShimError::ExecFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_failed_message_includes_exit_code_when_known() {
        let err = ShimError::ExecFailed {
            stderr: "ENOENT".into(),
            exit_code: Some(1),
        };
        assert_eq!(err.to_string(), "command failed (exit code 1): ENOENT");

        let err = ShimError::ExecFailed {
            stderr: "ENOENT".into(),
            exit_code: None,
        };
        assert_eq!(err.to_string(), "command failed: ENOENT");
    }

    #[test]
    fn runtime_shorthand_keeps_operation() {
        let err = ShimError::runtime("start_container", "no such container");
        assert!(matches!(
            err,
            ShimError::Runtime {
                operation: "start_container",
                ..
            }
        ));
        assert!(err.to_string().contains("no such container"));
    }
}

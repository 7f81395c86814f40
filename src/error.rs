//! Error types for the reactor.
//!
//! This module defines error codes, script error details, and the main error
//! type used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Render exceeded its timeout
    Timeout,
    /// Render attempted on a closed worker
    Closed,
    /// Server code failed to load into a fresh engine context
    CompilationError,
    /// Script threw, or the entry point does not exist
    ExecutionError,
    /// Request or response could not be encoded/decoded
    SerializationError,
    /// Engine context was used after it was released
    ContextReleased,
    /// Process-wide engine runtime has not been initialized
    NotInitialized,
    /// Pool has been shut down
    Shutdown,
    /// Invalid argument or configuration
    InvalidArgument,
    /// Internal error (bug)
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::Closed => write!(f, "CLOSED"),
            ErrorCode::CompilationError => write!(f, "COMPILATION_ERROR"),
            ErrorCode::ExecutionError => write!(f, "EXECUTION_ERROR"),
            ErrorCode::SerializationError => write!(f, "SERIALIZATION_ERROR"),
            ErrorCode::ContextReleased => write!(f, "CONTEXT_RELEASED"),
            ErrorCode::NotInitialized => write!(f, "NOT_INITIALIZED"),
            ErrorCode::Shutdown => write!(f, "SHUTDOWN"),
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// Error raised by script code running inside an engine context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptError {
    /// Error code
    pub code: ErrorCode,

    /// The script's error text
    pub message: String,

    /// Label of the source that was being evaluated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// JavaScript stack trace, when the thrown value carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ScriptError {
    /// Create a new script error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            label: None,
            stack: None,
        }
    }

    /// Create an execution error
    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionError, message)
    }

    /// Replace the error code
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    /// Add the source label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add stack trace
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(label) = &self.label {
            write!(f, " at {}", label)?;
        }
        if let Some(stack) = &self.stack {
            write!(f, "\n{}", stack)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

/// Main error type for the reactor
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Error raised by script code
    #[error("{0}")]
    Script(#[from] ScriptError),

    /// Render attempted on a closed worker
    #[error("worker closed")]
    Closed,

    /// Render exceeded its timeout
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// Engine context used after release
    #[error("engine context released")]
    ContextReleased,

    /// Engine runtime not initialized
    #[error("engine runtime not initialized; call nexus_reactor::init first")]
    NotInitialized,

    /// Pool has been shut down
    #[error("Pool is shut down")]
    Shutdown,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// The error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            RuntimeError::Script(e) => e.code,
            RuntimeError::Closed => ErrorCode::Closed,
            RuntimeError::TimedOut(_) => ErrorCode::Timeout,
            RuntimeError::ContextReleased => ErrorCode::ContextReleased,
            RuntimeError::NotInitialized => ErrorCode::NotInitialized,
            RuntimeError::Shutdown => ErrorCode::Shutdown,
            RuntimeError::Config(_) => ErrorCode::InvalidArgument,
            RuntimeError::Io(_) => ErrorCode::InternalError,
            RuntimeError::Serialization(_) => ErrorCode::SerializationError,
            RuntimeError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the render failed because it ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::TimedOut(_))
    }

    /// Whether the render failed because the worker was closed
    pub fn is_closed(&self) -> bool {
        matches!(self, RuntimeError::Closed)
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        RuntimeError::Serialization(e.to_string())
    }
}

/// Result type alias for reactor operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Timeout.to_string(), "TIMEOUT");
        assert_eq!(ErrorCode::CompilationError.to_string(), "COMPILATION_ERROR");
    }

    #[test]
    fn test_script_error_display() {
        let err = ScriptError::execution_error("ReferenceError: render is not defined")
            .with_label("server.js");
        assert_eq!(
            err.to_string(),
            "[EXECUTION_ERROR] ReferenceError: render is not defined at server.js"
        );

        let err = err.with_stack("at render (server.js:1:1)");
        assert!(err.to_string().ends_with("\nat render (server.js:1:1)"));
    }

    #[test]
    fn test_script_error_with_code() {
        let err = ScriptError::execution_error("Uncaught exception: hi")
            .with_code(ErrorCode::CompilationError);
        assert_eq!(err.code, ErrorCode::CompilationError);
        assert_eq!(RuntimeError::from(err).code(), ErrorCode::CompilationError);
    }

    #[test]
    fn test_distinct_messages() {
        assert_eq!(RuntimeError::Closed.to_string(), "worker closed");

        let timed_out = RuntimeError::TimedOut(Duration::from_millis(10));
        assert!(timed_out.to_string().contains("timed out"));
        assert!(timed_out.is_timeout());
        assert!(!timed_out.is_closed());
        assert_eq!(timed_out.code(), ErrorCode::Timeout);
    }

    #[test]
    fn test_script_error_serialization() {
        let err = ScriptError::new(ErrorCode::CompilationError, "SyntaxError: unexpected token");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("COMPILATION_ERROR"));
        assert!(!json.contains("stack"));
    }

    #[test]
    fn test_runtime_error_conversion() {
        let script = ScriptError::execution_error("Uncaught exception: hi");
        let err = RuntimeError::from(script);
        assert_eq!(err.code(), ErrorCode::ExecutionError);
        assert_eq!(err.to_string(), "[EXECUTION_ERROR] Uncaught exception: hi");

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = RuntimeError::from(json_err);
        assert_eq!(err.code(), ErrorCode::SerializationError);
    }
}

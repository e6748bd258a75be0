//! Error types for Cardkeep
//!
//! All modules use `CardkeepResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Cardkeep operations
pub type CardkeepResult<T> = Result<T, CardkeepError>;

/// Boxed underlying error carried by `RetriesExhausted`
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All errors that can occur in Cardkeep
#[derive(Error, Debug)]
pub enum CardkeepError {
    // Resilience errors
    #[error("{dependency}: retries exhausted after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        dependency: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    #[error("Circuit open for {0}, skipping fetch")]
    CircuitOpen(String),

    #[error("Validation failed for {path}: {reason}")]
    ValidationFailed { path: PathBuf, reason: String },

    #[error("Invalid name: {0:?} (must contain at least one alphanumeric character)")]
    InvalidName(String),

    // Generator errors
    #[error("Generator {path} is outside the allowed directory {allowed}")]
    GeneratorNotAllowed { path: PathBuf, allowed: PathBuf },

    #[error("Interpreter {interpreter} is not allowed (allowed: {})", .allowed.join(", "))]
    InterpreterNotAllowed {
        interpreter: String,
        allowed: Vec<String>,
    },

    #[error("Generator {generator} failed: {reason}")]
    GenerationFailed { generator: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl CardkeepError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a validation failed error
    pub fn validation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable on the next scheduled run
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetriesExhausted { .. }
                | Self::CircuitOpen(_)
                | Self::ValidationFailed { .. }
                | Self::GenerationFailed { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CircuitOpen(_) => {
                Some("Wait for the open timeout to elapse, or run: cardkeep circuit reset <name>")
            }
            Self::GeneratorNotAllowed { .. } => {
                Some("Move the generator under paths.generators_dir or update the config")
            }
            Self::InterpreterNotAllowed { .. } => {
                Some("Add the interpreter to paths.interpreters in the config")
            }
            Self::ConfigInvalid { .. } => Some("Run: cardkeep config show"),
            _ => None,
        }
    }
}

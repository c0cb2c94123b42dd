//! Error handling module for the sync hook
//!
//! Provides the hook's error taxonomy using thiserror. Every error maps to a
//! process exit status via [`HookError::exit_code`].

use std::path::PathBuf;
use thiserror::Error;

use crate::stage::StageTransitionError;

/// Main error type for the sync hook
#[derive(Error, Debug)]
pub enum HookError {
    /// An external command exited non-zero (or was killed by a signal)
    #[error("Command failed with exit code {code}: {command}")]
    CommandFailed { command: String, code: i32 },

    /// The generated local.conf is missing after initialization
    #[error("local.conf not found at {}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// An external command could not be started at all
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The captured toolchain environment could not be parsed
    #[error("Environment capture failed: {0}")]
    EnvCapture(String),

    /// Hook configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors outside the config-not-found path
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stage machine misuse
    #[error("Stage transition error: {0}")]
    Transition(#[from] StageTransitionError),
}

/// Result type alias for hook operations
pub type Result<T> = std::result::Result<T, HookError>;

impl HookError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an environment capture error
    pub fn env_capture(msg: impl Into<String>) -> Self {
        Self::EnvCapture(msg.into())
    }

    /// Process exit status this error should terminate the hook with.
    ///
    /// A failed child command propagates its own status; everything else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CommandFailed { code, .. } => *code,
            _ => 1,
        }
    }
}

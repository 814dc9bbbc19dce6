//! Sandbox error types.

use std::path::PathBuf;

/// Errors from the module cache and sandbox runner.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// A module is already compiled under this name.
    #[error("module {name} is already loaded")]
    AlreadyLoaded {
        /// Logical instance name.
        name: String,
    },

    /// No compiled module exists for this name.
    #[error("module {name} not found in cache")]
    NotLoaded {
        /// Logical instance name.
        name: String,
    },

    /// A session for this name is still running.
    #[error("module {name} already has a running session")]
    AlreadyRunning {
        /// Logical instance name.
        name: String,
    },

    /// The bytecode failed validation or compilation.
    #[error("failed to compile module {name}: {reason}")]
    Compile {
        /// Logical instance name.
        name: String,
        /// Diagnostic from the compiler.
        reason: String,
    },

    /// A capability in the policy could not be granted.
    #[error("cannot grant capability {path}: {reason}")]
    Capability {
        /// Host path that was requested.
        path: PathBuf,
        /// Failure reason.
        reason: String,
    },

    /// Engine or linker setup failed.
    #[error("sandbox runtime error: {0}")]
    Runtime(String),

    /// The host is shutting down and refuses new work.
    #[error("sandbox host is shutting down")]
    ShuttingDown,
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;

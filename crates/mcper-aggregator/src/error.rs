//! Aggregator error types.

use std::fmt;
use std::time::Duration;

/// Startup stage a backend reached before failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStage {
    /// Classifying the source string.
    Resolve,
    /// Reading or downloading module bytes.
    Fetch,
    /// Compiling the module.
    Load,
    /// Starting the sandboxed module.
    Run,
    /// MCP handshake.
    Connect,
    /// Enumerating the tool catalog.
    ListTools,
    /// Publishing namespaced tools.
    Register,
}

impl fmt::Display for BackendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolve => "resolve",
            Self::Fetch => "fetch",
            Self::Load => "load",
            Self::Run => "run",
            Self::Connect => "connect",
            Self::ListTools => "list-tools",
            Self::Register => "register",
        })
    }
}

/// Errors from backend setup and forwarded calls.
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    /// A backend failed during startup.
    #[error("plugin {plugin} failed at {stage}: {reason}")]
    Backend {
        /// Configured source string.
        plugin: String,
        /// Stage reached.
        stage: BackendStage,
        /// Underlying failure.
        reason: String,
    },

    /// Transport or handshake failure with a backend.
    #[error("session error for {instance}: {reason}")]
    Session {
        /// Backend instance name.
        instance: String,
        /// Failure reason.
        reason: String,
    },

    /// Two tools mapped to the same namespaced name.
    #[error("namespace collision: tool {0} is already registered")]
    NamespaceCollision(String),

    /// The backend reported a failure for a forwarded call.
    #[error("{0}")]
    ToolCall(String),

    /// A bounded wait elapsed.
    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// Limit that elapsed.
        limit: Duration,
    },

    /// No tool is registered under this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The aggregator is shutting down.
    #[error("aggregator is shutting down")]
    ShuttingDown,

    /// Plugin resolution or cache error.
    #[error(transparent)]
    Plugin(#[from] mcper_plugins::PluginError),

    /// Sandbox error.
    #[error(transparent)]
    Sandbox(#[from] mcper_sandbox::SandboxError),
}

impl AggregatorError {
    pub(crate) fn backend(
        plugin: impl Into<String>,
        stage: BackendStage,
        reason: impl fmt::Display,
    ) -> Self {
        Self::Backend {
            plugin: plugin.into(),
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Result type for aggregator operations.
pub type AggregatorResult<T> = Result<T, AggregatorError>;

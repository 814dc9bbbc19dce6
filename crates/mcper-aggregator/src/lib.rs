//! mcper Aggregator - one MCP server in front of many plugin backends.
//!
//! This crate provides:
//! - [`Aggregator`]: brings up configured backends (sandboxed modules or
//!   remote HTTP servers) and dispatches calls to them
//! - [`ToolRegistry`]: the published tool set, keyed by
//!   `{kind}/{instance}/{tool}` and never overwritten
//! - [`BackendSession`]: an MCP client session to one backend
//! - [`NativeTool`]: built-in tools under `mcper/native/`
//! - [`AggregatorServer`]: the outward MCP server handler
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use mcper_aggregator::{Aggregator, AggregatorServer, AggregatorSettings};
//! use mcper_core::McperHome;
//! use mcper_plugins::ProjectConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let home = McperHome::resolve()?;
//! let settings = AggregatorSettings::new(&home, Path::new("."));
//! let config = ProjectConfig::load_or_default(&mcper_core::project_config_path(Path::new(".")))?;
//!
//! let aggregator = Aggregator::start(settings, &config).await?;
//! AggregatorServer::new(aggregator.clone()).serve_stdio().await?;
//! aggregator.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod backend;
mod error;
pub mod native;
pub mod registry;
pub mod router;
pub mod server;

pub use backend::{AggregatorClient, BackendKind, BackendSession};
pub use error::{AggregatorError, AggregatorResult, BackendStage};
pub use native::{NativeContext, NativeTool};
pub use registry::{
    BackendHandle, NATIVE_NAMESPACE, ToolRegistration, ToolRegistry, namespaced_name,
};
pub use router::{
    Aggregator, AggregatorSettings, DEFAULT_CALL_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use server::AggregatorServer;

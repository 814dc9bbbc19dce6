//! mcper Sandbox - compiles WASM modules once and runs them behind stdio pipes.
//!
//! [`SandboxHost`] owns the wasmtime engine, the per-name compiled module
//! cache and the background task of every running module. Each run produces a
//! [`SandboxSession`] whose reader/writer halves are the module's stdout and
//! stdin; the aggregator speaks MCP over them.
//!
//! Modules run under WASI preview1 with a restricted capability set described
//! by [`SandboxPolicy`]: injected environment variables and explicitly
//! preopened directories. There is no socket access; modules importing the
//! WasmEdge socket extension are rejected when loaded.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod host;
mod pipe;
mod policy;
mod session;

pub use error::{SandboxError, SandboxResult};
pub use host::SandboxHost;
pub use pipe::{LoggingReader, LoggingWriter};
pub use policy::SandboxPolicy;
pub use session::{SandboxSession, SessionExit, SessionMonitor, SessionReader, SessionWriter};

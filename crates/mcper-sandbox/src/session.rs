//! Running module sessions and their completion signal.

use std::fmt;

use tokio::io::DuplexStream;
use tokio::sync::watch;

use crate::pipe::{LoggingReader, LoggingWriter};

/// Host side of the module's stdout.
pub type SessionReader = LoggingReader<DuplexStream>;

/// Host side of the module's stdin.
pub type SessionWriter = LoggingWriter<DuplexStream>;

/// How a module run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// `_start` returned or the module called `proc_exit`.
    Exited(i32),
    /// The module trapped or failed to instantiate.
    Trapped(String),
    /// The run was aborted by host shutdown.
    Cancelled,
}

impl SessionExit {
    /// Whether the module finished with exit code zero.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Trapped(reason) => write!(f, "trapped: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Observes the completion of one module run.
#[derive(Clone)]
pub struct SessionMonitor {
    name: String,
    rx: watch::Receiver<Option<SessionExit>>,
}

impl SessionMonitor {
    pub(crate) fn new(name: String, rx: watch::Receiver<Option<SessionExit>>) -> Self {
        Self { name, rx }
    }

    /// Instance name of the run.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The exit status, if the module has finished.
    #[must_use]
    pub fn exit(&self) -> Option<SessionExit> {
        self.rx.borrow().clone()
    }

    /// Whether the module is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.rx.borrow().is_none() && self.rx.has_changed().is_ok()
    }

    /// Wait for the module to finish.
    ///
    /// A run whose task was aborted before reporting resolves to
    /// [`SessionExit::Cancelled`].
    pub async fn wait(&mut self) -> SessionExit {
        match self.rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone().unwrap_or(SessionExit::Cancelled),
            Err(_) => SessionExit::Cancelled,
        }
    }
}

impl fmt::Debug for SessionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMonitor")
            .field("name", &self.name)
            .field("exit", &*self.rx.borrow())
            .finish_non_exhaustive()
    }
}

/// A running module: its stdio pipes plus a completion monitor.
///
/// Writing to [`SessionWriter`] feeds the module's stdin; reading from
/// [`SessionReader`] yields its stdout. Dropping the writer closes stdin.
#[derive(Debug)]
pub struct SandboxSession {
    reader: SessionReader,
    writer: SessionWriter,
    monitor: SessionMonitor,
}

impl SandboxSession {
    pub(crate) fn new(reader: SessionReader, writer: SessionWriter, monitor: SessionMonitor) -> Self {
        Self {
            reader,
            writer,
            monitor,
        }
    }

    /// Instance name of the run.
    #[must_use]
    pub fn name(&self) -> &str {
        self.monitor.name()
    }

    /// A handle observing completion of the run.
    #[must_use]
    pub fn monitor(&self) -> SessionMonitor {
        self.monitor.clone()
    }

    /// Wait for the module to finish.
    pub async fn wait(&mut self) -> SessionExit {
        self.monitor.wait().await
    }

    /// Split into the `(reader, writer)` transport pair.
    #[must_use]
    pub fn into_transport(self) -> (SessionReader, SessionWriter) {
        (self.reader, self.writer)
    }

    /// Split into the transport pair plus the completion monitor.
    #[must_use]
    pub fn into_parts(self) -> (SessionReader, SessionWriter, SessionMonitor) {
        (self.reader, self.writer, self.monitor)
    }
}

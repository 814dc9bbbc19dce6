//! Module cache and sandbox runner.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wasmtime::{Config, Engine, Linker, Module, Store};
use wasmtime_wasi::pipe::{AsyncReadStream, AsyncWriteStream};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{AsyncStdinStream, AsyncStdoutStream, I32Exit, WasiCtxBuilder};

use crate::error::{SandboxError, SandboxResult};
use crate::pipe::{LoggingReader, LoggingWriter};
use crate::policy::SandboxPolicy;
use crate::session::{SandboxSession, SessionExit, SessionMonitor};

/// Buffer size of each in-memory stdio pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Bytes the guest may buffer in stdout before a write blocks.
const STDOUT_WRITE_BUDGET: usize = 64 * 1024;

/// WASI namespaces a core module may import from.
const WASI_P1_NAMESPACES: [&str; 2] = ["wasi_snapshot_preview1", "wasi_unstable"];

/// Socket calls from the WasmEdge extension that preview1 does not define.
const SOCKET_EXTENSION: [&str; 11] = [
    "sock_open",
    "sock_bind",
    "sock_connect",
    "sock_listen",
    "sock_getaddrinfo",
    "sock_getlocaladdr",
    "sock_getpeeraddr",
    "sock_getsockopt",
    "sock_setsockopt",
    "sock_recv_from",
    "sock_send_to",
];

/// Per-store state handed to the WASI host functions.
struct SessionState {
    wasi: WasiP1Ctx,
}

struct RunningTask {
    handle: JoinHandle<()>,
    monitor: SessionMonitor,
}

/// Compiles modules once and runs them in capability-scoped sandboxes.
///
/// Holds the compiled module cache and the background task of every module
/// it has started. Cheap operations (lookup, run) take the cache lock for
/// reading; compilation happens outside the lock.
pub struct SandboxHost {
    engine: Engine,
    modules: RwLock<HashMap<String, Module>>,
    tasks: Mutex<HashMap<String, RunningTask>>,
    shutting_down: AtomicBool,
}

impl SandboxHost {
    /// Create a host with an async-capable engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be configured.
    pub fn new() -> SandboxResult<Self> {
        let mut config = Config::new();
        config.async_support(true);
        let engine = Engine::new(&config).map_err(|e| SandboxError::Runtime(e.to_string()))?;

        Ok(Self {
            engine,
            modules: RwLock::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Compile `bytecode` and cache it under `name`.
    ///
    /// Accepts core WASM binaries (and WAT text). Component-model binaries
    /// and modules importing socket extension calls are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::AlreadyLoaded`] if `name` is cached, whatever
    /// the bytecode, or [`SandboxError::Compile`] if compilation fails or
    /// the module needs sockets.
    pub async fn load(&self, name: &str, bytecode: &[u8]) -> SandboxResult<()> {
        if self.modules.read().await.contains_key(name) {
            return Err(SandboxError::AlreadyLoaded {
                name: name.to_string(),
            });
        }

        if wasmparser::Parser::is_component(bytecode) {
            return Err(SandboxError::Compile {
                name: name.to_string(),
                reason: "component-model binaries are not supported, build for wasm32-wasip1"
                    .to_string(),
            });
        }

        let engine = self.engine.clone();
        let bytes = bytecode.to_vec();
        let module = tokio::task::spawn_blocking(move || Module::new(&engine, &bytes))
            .await
            .map_err(|e| SandboxError::Compile {
                name: name.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|e| SandboxError::Compile {
                name: name.to_string(),
                reason: format!("{e:#}"),
            })?;

        if let Some(call) = socket_import(&module) {
            return Err(SandboxError::Compile {
                name: name.to_string(),
                reason: format!(
                    "module imports socket call `{call}`; sandboxed modules have no network access"
                ),
            });
        }

        let mut modules = self.modules.write().await;
        if modules.contains_key(name) {
            return Err(SandboxError::AlreadyLoaded {
                name: name.to_string(),
            });
        }
        modules.insert(name.to_string(), module);
        info!(module = %name, size = bytecode.len(), "compiled module");
        Ok(())
    }

    /// Whether a compiled module is cached under `name`.
    pub async fn is_loaded(&self, name: &str) -> bool {
        self.modules.read().await.contains_key(name)
    }

    /// Names of all cached modules, sorted.
    pub async fn loaded(&self) -> Vec<String> {
        let mut names: Vec<_> = self.modules.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start the cached module `name` under `policy`.
    ///
    /// Returns once the run is scheduled; instantiation and `_start` execute
    /// on a background task. The module's stdin and stdout are connected to
    /// the returned session's writer and reader.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::NotLoaded`] if nothing is cached under `name`,
    /// [`SandboxError::AlreadyRunning`] if a previous run has not finished,
    /// or [`SandboxError::Capability`] if the policy cannot be granted.
    pub async fn run(&self, name: &str, policy: &SandboxPolicy) -> SandboxResult<SandboxSession> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SandboxError::ShuttingDown);
        }

        let module = self
            .modules
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SandboxError::NotLoaded {
                name: name.to_string(),
            })?;

        let mut tasks = self.tasks.lock().await;
        if tasks.get(name).is_some_and(|t| !t.handle.is_finished()) {
            return Err(SandboxError::AlreadyRunning {
                name: name.to_string(),
            });
        }

        let (host_stdin, guest_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (guest_stdout, host_stdout) = tokio::io::duplex(PIPE_CAPACITY);

        let mut builder = WasiCtxBuilder::new();
        builder
            .arg(name)
            .stdin(AsyncStdinStream::new(AsyncReadStream::new(guest_stdin)))
            .stdout(AsyncStdoutStream::new(AsyncWriteStream::new(
                STDOUT_WRITE_BUDGET,
                guest_stdout,
            )))
            .inherit_stderr();
        policy.apply(&mut builder)?;

        let mut linker: Linker<SessionState> = Linker::new(&self.engine);
        preview1::add_to_linker_async(&mut linker, |s| &mut s.wasi)
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;
        let store = Store::new(
            &self.engine,
            SessionState {
                wasi: builder.build_p1(),
            },
        );

        let (exit_tx, exit_rx) = watch::channel(None);
        let monitor = SessionMonitor::new(name.to_string(), exit_rx);

        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let exit = execute(linker, store, module).await;
            match &exit {
                SessionExit::Exited(0) => info!(module = %task_name, "module exited"),
                SessionExit::Exited(code) => {
                    warn!(module = %task_name, exit_code = code, "module exited with non-zero status");
                },
                SessionExit::Trapped(reason) => {
                    error!(module = %task_name, reason = %reason, "module trapped");
                },
                SessionExit::Cancelled => debug!(module = %task_name, "module cancelled"),
            }
            let _ = exit_tx.send(Some(exit));
        });

        tasks.insert(
            name.to_string(),
            RunningTask {
                handle,
                monitor: monitor.clone(),
            },
        );

        info!(
            module = %name,
            env_vars = policy.env().len(),
            preopens = policy.preopened_dirs().len(),
            "started sandboxed module"
        );

        let reader = LoggingReader::new(format!("{name}:stdout"), host_stdout);
        let writer = LoggingWriter::new(format!("{name}:stdin"), host_stdin);
        Ok(SandboxSession::new(reader, writer, monitor))
    }

    /// Completion monitor of the most recent run of `name`, if any.
    pub async fn monitor(&self, name: &str) -> Option<SessionMonitor> {
        self.tasks.lock().await.get(name).map(|t| t.monitor.clone())
    }

    /// Wait for every running module to finish, aborting stragglers.
    ///
    /// Modules still running after `timeout` are aborted and report
    /// [`SessionExit::Cancelled`]. New runs are refused afterwards.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutting_down.store(true, Ordering::Release);
        let tasks: Vec<_> = self.tasks.lock().await.drain().collect();
        if tasks.is_empty() {
            return;
        }

        let deadline = tokio::time::Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(tokio::time::Instant::now);

        for (name, mut task) in tasks {
            if tokio::time::timeout_at(deadline, &mut task.handle)
                .await
                .is_err()
            {
                warn!(module = %name, "module did not exit before shutdown timeout, aborting");
                task.handle.abort();
                let _ = task.handle.await;
            }
        }
        info!("sandbox host shut down");
    }
}

impl fmt::Debug for SandboxHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHost")
            .field("shutting_down", &self.shutting_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// First socket extension call the module imports, as `namespace::name`.
fn socket_import(module: &Module) -> Option<String> {
    module
        .imports()
        .find(|i| WASI_P1_NAMESPACES.contains(&i.module()) && SOCKET_EXTENSION.contains(&i.name()))
        .map(|i| format!("{}::{}", i.module(), i.name()))
}

async fn execute(
    linker: Linker<SessionState>,
    mut store: Store<SessionState>,
    module: Module,
) -> SessionExit {
    let instance = match linker.instantiate_async(&mut store, &module).await {
        Ok(instance) => instance,
        Err(e) => return SessionExit::Trapped(format!("instantiation failed: {e:#}")),
    };

    let start = match instance.get_typed_func::<(), ()>(&mut store, "_start") {
        Ok(start) => start,
        Err(e) => return SessionExit::Trapped(format!("missing _start export: {e:#}")),
    };

    match start.call_async(&mut store, ()).await {
        Ok(()) => SessionExit::Exited(0),
        Err(e) => match e.downcast_ref::<I32Exit>() {
            Some(I32Exit(code)) => SessionExit::Exited(*code),
            None => SessionExit::Trapped(format!("{e:#}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Copies stdin to stdout until EOF.
    const CAT_WAT: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_read"
            (func $fd_read (param i32 i32 i32 i32) (result i32)))
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "_start")
            (local $n i32)
            (block $done
              (loop $next
                (i32.store (i32.const 0) (i32.const 64))
                (i32.store (i32.const 4) (i32.const 1024))
                (br_if $done
                  (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 16)))
                (local.set $n (i32.load (i32.const 16)))
                (br_if $done (i32.eqz (local.get $n)))
                (i32.store (i32.const 32) (i32.const 64))
                (i32.store (i32.const 36) (local.get $n))
                (br_if $done
                  (call $fd_write (i32.const 1) (i32.const 32) (i32.const 1) (i32.const 48)))
                (br $next)))))
    "#;

    const EXIT_7_WAT: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
          (memory (export "memory") 1)
          (func (export "_start") (call $proc_exit (i32.const 7))))
    "#;

    const TRAP_WAT: &str = r#"
        (module
          (memory (export "memory") 1)
          (func (export "_start") unreachable))
    "#;

    #[tokio::test]
    async fn test_load_rejects_duplicate_name() {
        let host = SandboxHost::new().unwrap();
        host.load("echo", CAT_WAT.as_bytes()).await.unwrap();

        let err = host.load("echo", EXIT_7_WAT.as_bytes()).await.unwrap_err();
        assert!(matches!(err, SandboxError::AlreadyLoaded { .. }));
        assert!(host.is_loaded("echo").await);
    }

    #[tokio::test]
    async fn test_load_rejects_garbage() {
        let host = SandboxHost::new().unwrap();
        let err = host.load("bad", b"\0asm\x01\0\0\0garbage").await.unwrap_err();
        assert!(matches!(err, SandboxError::Compile { .. }));
        assert!(!host.is_loaded("bad").await);
    }

    #[tokio::test]
    async fn test_load_rejects_socket_extension_imports() {
        const SOCKET_WAT: &str = r#"
            (module
              (import "wasi_snapshot_preview1" "sock_open"
                (func $sock_open (param i32 i32 i32) (result i32)))
              (import "wasi_snapshot_preview1" "sock_connect"
                (func $sock_connect (param i32 i32 i32) (result i32)))
              (memory (export "memory") 1)
              (func (export "_start")))
        "#;

        let host = SandboxHost::new().unwrap();
        let err = host.load("github", SOCKET_WAT.as_bytes()).await.unwrap_err();
        match err {
            SandboxError::Compile { ref name, ref reason } => {
                assert_eq!(name, "github");
                assert!(reason.contains("wasi_snapshot_preview1::sock_open"), "reason: {reason}");
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(!host.is_loaded("github").await);
    }

    #[tokio::test]
    async fn test_run_unknown_module() {
        let host = SandboxHost::new().unwrap();
        let err = host.run("missing", &SandboxPolicy::new()).await.unwrap_err();
        assert!(matches!(err, SandboxError::NotLoaded { .. }));
    }

    #[tokio::test]
    async fn test_run_pipes_stdio() {
        let host = SandboxHost::new().unwrap();
        host.load("cat", CAT_WAT.as_bytes()).await.unwrap();

        let session = host.run("cat", &SandboxPolicy::new()).await.unwrap();
        let mut monitor = session.monitor();
        let (mut reader, mut writer) = session.into_transport();

        writer.write_all(b"{\"jsonrpc\":\"2.0\"}\n").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "{\"jsonrpc\":\"2.0\"}\n");
        assert_eq!(monitor.wait().await, SessionExit::Exited(0));
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let host = SandboxHost::new().unwrap();
        host.load("exit7", EXIT_7_WAT.as_bytes()).await.unwrap();

        let session = host.run("exit7", &SandboxPolicy::new()).await.unwrap();
        let mut monitor = session.monitor();
        let (mut reader, _writer) = session.into_transport();

        assert_eq!(monitor.wait().await, SessionExit::Exited(7));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_trap_is_reported() {
        let host = SandboxHost::new().unwrap();
        host.load("trap", TRAP_WAT.as_bytes()).await.unwrap();

        let mut monitor = host.run("trap", &SandboxPolicy::new()).await.unwrap().monitor();
        assert!(matches!(monitor.wait().await, SessionExit::Trapped(_)));
    }

    #[tokio::test]
    async fn test_second_run_while_running_is_rejected() {
        let host = SandboxHost::new().unwrap();
        host.load("cat", CAT_WAT.as_bytes()).await.unwrap();

        let _session = host.run("cat", &SandboxPolicy::new()).await.unwrap();
        let err = host.run("cat", &SandboxPolicy::new()).await.unwrap_err();
        assert!(matches!(err, SandboxError::AlreadyRunning { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_blocked_module() {
        let host = SandboxHost::new().unwrap();
        host.load("cat", CAT_WAT.as_bytes()).await.unwrap();

        // Holding the writer keeps the module blocked on stdin.
        let session = host.run("cat", &SandboxPolicy::new()).await.unwrap();
        let mut monitor = session.monitor();
        let (_reader, _writer) = session.into_transport();

        host.shutdown(Duration::from_millis(100)).await;
        assert_eq!(monitor.wait().await, SessionExit::Cancelled);

        let err = host.run("cat", &SandboxPolicy::new()).await.unwrap_err();
        assert!(matches!(err, SandboxError::ShuttingDown));
    }
}

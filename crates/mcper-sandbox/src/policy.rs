//! Capability policy applied to each sandboxed module.

use std::path::PathBuf;

use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::error::{SandboxError, SandboxResult};

/// Capabilities granted to one module run.
///
/// The default grants no environment and no filesystem. Sockets and name
/// lookup are always denied. Stdin and stdout are always connected to the session pipes; stderr is
/// inherited so module diagnostics reach the host log.
#[derive(Debug, Clone, Default)]
pub struct SandboxPolicy {
    env: Vec<(String, String)>,
    preopened_dirs: Vec<PathBuf>,
}

impl SandboxPolicy {
    /// Create an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Inject several environment variables.
    #[must_use]
    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Preopen a host directory at the same path inside the guest.
    #[must_use]
    pub fn with_preopened_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.preopened_dirs.push(dir.into());
        self
    }

    /// Injected environment variables, in insertion order.
    #[must_use]
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Preopened host directories.
    #[must_use]
    pub fn preopened_dirs(&self) -> &[PathBuf] {
        &self.preopened_dirs
    }

    pub(crate) fn apply(&self, builder: &mut WasiCtxBuilder) -> SandboxResult<()> {
        for (key, value) in &self.env {
            builder.env(key, value);
        }

        for dir in &self.preopened_dirs {
            if !dir.is_dir() {
                return Err(SandboxError::Capability {
                    path: dir.clone(),
                    reason: "not an existing directory".to_string(),
                });
            }
            let guest = dir.to_string_lossy().into_owned();
            builder
                .preopened_dir(dir, guest, DirPerms::all(), FilePerms::all())
                .map_err(|e| SandboxError::Capability {
                    path: dir.clone(),
                    reason: e.to_string(),
                })?;
        }

        builder
            .allow_tcp(false)
            .allow_udp(false)
            .allow_ip_name_lookup(false);

        Ok(())
    }
}

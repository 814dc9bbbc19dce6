//! Backend setup and call dispatch.
//!
//! Each configured plugin walks the same pipeline: resolve the source string,
//! obtain module bytes (local read or cached download) or connect over HTTP,
//! compile and run the module in the sandbox, open an MCP session, list the
//! backend's tools and publish them under `{kind}/{instance}/{tool}`.
//!
//! Configured backends are all-or-nothing: the first failure aborts startup
//! with the source string and stage attached. Cloud servers discovered from
//! the account are added afterwards on a best-effort basis.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mcper_core::McperHome;
use mcper_plugins::{
    ArtifactFetcher, Credentials, IntegrityCache, PluginConfig, PluginSource, ProjectConfig,
    SourceResolver, fetch_remote_servers, local_plugin_name, read_local,
};
use mcper_sandbox::{SandboxHost, SandboxPolicy, SessionMonitor};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendKind, BackendSession, EXIT_REPORT_GRACE};
use crate::error::{AggregatorError, AggregatorResult, BackendStage};
use crate::native::{NativeContext, NativeTool};
use crate::registry::{BackendHandle, ToolRegistration, ToolRegistry};

/// Default limit for one forwarded tool call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Default grace period for backends and modules at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Proxy variables handed to modules when cloud forwarding is active.
const PROXY_ENV_VARS: [&str; 3] = ["HTTP_PROXY", "HTTPS_PROXY", "MCPER_PROXY_URL"];

/// Bearer token variable handed to modules alongside the proxy URL.
const PROXY_TOKEN_VAR: &str = "MCPER_AUTH_TOKEN";

/// Explicit configuration for one [`Aggregator`].
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Registry base URL.
    pub registry_base: String,
    /// mcper home directory.
    pub home: PathBuf,
    /// Artifact cache root.
    pub cache_root: PathBuf,
    /// Project configuration file shown by the native tools.
    pub project_config: PathBuf,
    /// Limit for one forwarded call.
    pub call_timeout: Duration,
    /// Grace period at shutdown.
    pub shutdown_timeout: Duration,
    /// Publish the `mcper/native/*` tools.
    pub native_tools: bool,
    /// Cloud credentials; only valid ones are used.
    pub credentials: Option<Credentials>,
}

impl AggregatorSettings {
    /// Settings rooted at `home` for the project at `project_root`.
    #[must_use]
    pub fn new(home: &McperHome, project_root: &Path) -> Self {
        Self {
            registry_base: mcper_plugins::DEFAULT_REGISTRY_BASE.to_string(),
            home: home.root().to_path_buf(),
            cache_root: home.cache_dir(),
            project_config: mcper_core::project_config_path(project_root),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            native_tools: true,
            credentials: None,
        }
    }

    /// Use another registry.
    #[must_use]
    pub fn with_registry_base(mut self, base: impl Into<String>) -> Self {
        self.registry_base = base.into();
        self
    }

    /// Set the forwarded call limit.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Do not publish the built-in tools.
    #[must_use]
    pub fn without_native_tools(mut self) -> Self {
        self.native_tools = false;
        self
    }

    /// Attach cloud credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    fn active_credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref().filter(|c| c.is_valid())
    }
}

/// The aggregation state: sandbox host, open backend sessions and the
/// published tool set.
pub struct Aggregator {
    settings: AggregatorSettings,
    resolver: SourceResolver,
    fetcher: ArtifactFetcher,
    host: SandboxHost,
    registry: ToolRegistry,
    sessions: Mutex<Vec<Arc<BackendSession>>>,
    native: NativeContext,
    shutdown: CancellationToken,
}

impl Aggregator {
    /// Create an aggregator with no backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry base is unusable, the HTTP client
    /// cannot be built or the sandbox engine cannot be created.
    pub fn new(settings: AggregatorSettings) -> AggregatorResult<Self> {
        let resolver = SourceResolver::new(settings.registry_base.clone())?;
        let client = mcper_plugins::http_client()?;
        let cache = IntegrityCache::new(settings.cache_root.clone());
        let fetcher = ArtifactFetcher::with_client(cache.clone(), client.clone());
        let native = NativeContext {
            client,
            resolver: resolver.clone(),
            cache,
            project_config: settings.project_config.clone(),
            home: settings.home.clone(),
        };

        Ok(Self {
            settings,
            resolver,
            fetcher,
            host: SandboxHost::new()?,
            registry: ToolRegistry::new(),
            sessions: Mutex::new(Vec::new()),
            native,
            shutdown: CancellationToken::new(),
        })
    }

    /// Create an aggregator and bring up every backend of `config`.
    ///
    /// # Errors
    ///
    /// Returns the first configured backend failure. Backends already
    /// started are shut down before returning.
    pub async fn start(
        settings: AggregatorSettings,
        config: &ProjectConfig,
    ) -> AggregatorResult<Arc<Self>> {
        let aggregator = Arc::new(Self::new(settings)?);
        if aggregator.settings.native_tools {
            aggregator.register_native_tools()?;
        }

        for (index, plugin) in config.plugins.iter().enumerate() {
            if let Err(e) = aggregator.add_backend(index, plugin).await {
                aggregator.shutdown().await;
                return Err(e);
            }
        }

        if aggregator.settings.active_credentials().is_some() {
            aggregator.add_cloud_backends().await;
        }

        info!(
            plugins = config.plugins.len(),
            tools = aggregator.registry.len(),
            "aggregator ready"
        );
        Ok(aggregator)
    }

    /// Publish the built-in tools.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::NamespaceCollision`] if they are already
    /// registered.
    pub fn register_native_tools(&self) -> AggregatorResult<()> {
        let count = self.registry.register_all(
            NativeTool::ALL
                .iter()
                .copied()
                .map(ToolRegistration::native)
                .collect(),
        )?;
        debug!(count, "registered native tools");
        Ok(())
    }

    /// Bring up the configured plugin at position `index`.
    ///
    /// Returns the number of tools published.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Backend`] naming the source and the stage
    /// that failed.
    pub async fn add_backend(&self, index: usize, plugin: &PluginConfig) -> AggregatorResult<usize> {
        let label = plugin.source.as_str();
        let source = self
            .resolver
            .parse(label)
            .map_err(|e| AggregatorError::backend(label, BackendStage::Resolve, e))?;
        info!(plugin = %source, index, "starting backend");

        let session = match &source {
            PluginSource::LocalFile { path } => {
                let bytes = read_local(path)
                    .await
                    .map_err(|e| AggregatorError::backend(label, BackendStage::Fetch, e))?;
                self.start_module(index, plugin, &local_plugin_name(path), &bytes)
                    .await?
            },
            PluginSource::RegistryArtifact(artifact) => {
                let declared_env: Vec<String> = plugin.env.keys().cloned().collect();
                let fetched = self
                    .fetcher
                    .fetch(artifact, plugin.permissions.as_ref(), &declared_env)
                    .await
                    .map_err(|e| AggregatorError::backend(label, BackendStage::Fetch, e))?;
                debug!(artifact = %artifact.cache_key(), origin = ?fetched.origin, "module bytes ready");
                self.start_module(index, plugin, &artifact.name, &fetched.bytes)
                    .await?
            },
            PluginSource::RemoteHttpEndpoint { url } => {
                BackendSession::connect_http(
                    BackendKind::Http,
                    &format!("plugin-{index}"),
                    url.as_str(),
                    None,
                )
                .await
                .map_err(|e| AggregatorError::backend(label, BackendStage::Connect, e))?
            },
        };

        self.add_session(label, session).await
    }

    async fn start_module(
        &self,
        index: usize,
        plugin: &PluginConfig,
        instance: &str,
        bytes: &[u8],
    ) -> AggregatorResult<BackendSession> {
        let label = plugin.source.as_str();
        let module_name = format!("plugin-{index}");
        self.host
            .load(&module_name, bytes)
            .await
            .map_err(|e| AggregatorError::backend(label, BackendStage::Load, e))?;

        let policy = self.policy_for(plugin);
        let sandboxed = self
            .host
            .run(&module_name, &policy)
            .await
            .map_err(|e| AggregatorError::backend(label, BackendStage::Run, e))?;
        let (reader, writer, monitor) = sandboxed.into_parts();

        match BackendSession::connect(BackendKind::Wasm, instance, reader, writer).await {
            Ok(session) => Ok(session.with_monitor(monitor)),
            Err(e) => {
                let reason = with_exit_status(e.to_string(), monitor).await;
                Err(AggregatorError::backend(label, BackendStage::Connect, reason))
            },
        }
    }

    /// List `session`'s tools and publish them.
    ///
    /// On failure the session is closed and nothing it offers stays
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Backend`] at the list-tools or register
    /// stage.
    pub async fn add_session(&self, label: &str, session: BackendSession) -> AggregatorResult<usize> {
        let session = Arc::new(session);
        match self.publish(&session).await {
            Ok(count) => {
                info!(
                    plugin = %label,
                    namespace = %format!("{}/{}", session.kind(), session.instance()),
                    tools = count,
                    "backend registered"
                );
                self.sessions.lock().await.push(session);
                Ok(count)
            },
            Err((stage, e)) => {
                session.close(self.settings.shutdown_timeout).await;
                Err(AggregatorError::backend(label, stage, e))
            },
        }
    }

    async fn publish(
        &self,
        session: &Arc<BackendSession>,
    ) -> Result<usize, (BackendStage, AggregatorError)> {
        let tools = session
            .list_tools()
            .await
            .map_err(|e| (BackendStage::ListTools, e))?;
        let registrations = tools
            .iter()
            .map(|tool| ToolRegistration::remote(session, tool))
            .collect();
        self.registry
            .register_all(registrations)
            .map_err(|e| (BackendStage::Register, e))
    }

    /// Add the servers registered to the cloud account. Each one is reached
    /// through the account's cloud MCP endpoint with bearer auth and
    /// namespaced by its server name. Failures are logged and skipped.
    ///
    /// Returns the number of servers added.
    pub async fn add_cloud_backends(&self) -> usize {
        let Some(credentials) = self.settings.active_credentials() else {
            return 0;
        };

        let servers = match fetch_remote_servers(&self.native.client, credentials).await {
            Ok(servers) => servers,
            Err(e) => {
                warn!(error = %e, "remote server discovery failed");
                return 0;
            },
        };

        let endpoint = credentials.mcp_endpoint();
        let mut added = 0usize;
        for server in servers {
            debug!(server = %server.name, endpoint = %endpoint, "connecting cloud server");
            let session = match BackendSession::connect_http(
                BackendKind::Cloud,
                &server.name,
                &endpoint,
                Some(&credentials.api_key),
            )
            .await
            {
                Ok(session) => session,
                Err(e) => {
                    warn!(server = %server.name, error = %e, "skipping cloud server");
                    continue;
                },
            };
            match self.add_session(&server.url, session).await {
                Ok(_) => added = added.saturating_add(1),
                Err(e) => warn!(server = %server.name, error = %e, "skipping cloud server"),
            }
        }
        added
    }

    /// Sandbox policy for `plugin`: mapped environment, proxy variables and
    /// preopened directories. Declared network hosts grant nothing.
    #[must_use]
    pub fn policy_for(&self, plugin: &PluginConfig) -> SandboxPolicy {
        let mut env = map_env(plugin, |var| std::env::var(var).ok());
        let proxy = self.settings.active_credentials();
        if let Some(credentials) = proxy {
            env.extend(proxy_env(credentials));
        }

        let mut policy = SandboxPolicy::new().with_envs(env);
        if let Some(permissions) = &plugin.permissions {
            for dir in &permissions.filesystem {
                policy = policy.with_preopened_dir(dir);
            }
            if !permissions.network.is_empty() {
                warn!(
                    plugin = %plugin.source,
                    hosts = ?permissions.network,
                    "network permissions are not granted to sandboxed modules"
                );
            }
        }
        policy
    }

    /// The published tools, sorted by name.
    #[must_use]
    pub fn tools(&self) -> Vec<Tool> {
        self.registry.list().iter().map(|r| r.to_tool()).collect()
    }

    /// The tool registry.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Token cancelled when shutdown begins.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Dispatch a call to a published tool.
    ///
    /// Backend failures and timeouts come back as `Ok` results marked as
    /// errors, carrying the backend's text.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::UnknownTool`] for unpublished names and
    /// [`AggregatorError::ShuttingDown`] once shutdown has begun.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> AggregatorResult<CallToolResult> {
        if self.shutdown.is_cancelled() {
            return Err(AggregatorError::ShuttingDown);
        }
        let registration = self
            .registry
            .get(name)
            .ok_or_else(|| AggregatorError::UnknownTool(name.to_string()))?;

        match &registration.handle {
            BackendHandle::Native(tool) => Ok(tool.invoke(&self.native, arguments.as_ref()).await),
            BackendHandle::Remote { session, tool } => {
                let call = session.call_tool(tool, arguments, self.settings.call_timeout);
                tokio::select! {
                    result = call => Ok(result.unwrap_or_else(|e| {
                        warn!(tool = %name, error = %e, "forwarded tool call failed");
                        CallToolResult::error(vec![Content::text(format!("Tool call failed: {e}"))])
                    })),
                    () = self.shutdown.cancelled() => Err(AggregatorError::ShuttingDown),
                }
            },
        }
    }

    /// Cancel pending calls, close every backend session, then stop the
    /// sandbox host.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let sessions: Vec<_> = self.sessions.lock().await.drain(..).collect();
        info!(sessions = sessions.len(), "shutting down aggregator");

        let timeout = self.settings.shutdown_timeout;
        close_all(&sessions, timeout).await;
        self.host.shutdown(timeout).await;
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("tools", &self.registry.len())
            .field("shutting_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

async fn close_all(sessions: &[Arc<BackendSession>], timeout: Duration) {
    let mut set = tokio::task::JoinSet::new();
    for session in sessions {
        let session = Arc::clone(session);
        set.spawn(async move { session.close(timeout).await });
    }
    while set.join_next().await.is_some() {}
}

/// Append the module's exit status to a handshake failure, if it exits
/// shortly.
async fn with_exit_status(reason: String, mut monitor: SessionMonitor) -> String {
    match tokio::time::timeout(EXIT_REPORT_GRACE, monitor.wait()).await {
        Ok(exit) => format!("{reason} (module {exit})"),
        Err(_) => reason,
    }
}

/// Map each `module var -> host var` pair to the host's current value.
/// Missing or empty host values are skipped with a warning.
fn map_env(
    plugin: &PluginConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<(String, String)> {
    plugin
        .env
        .iter()
        .filter_map(|(module_var, host_var)| match lookup(host_var) {
            Some(value) if !value.is_empty() => Some((module_var.clone(), value)),
            _ => {
                warn!(
                    plugin = %plugin.source,
                    module_var = %module_var,
                    host_var = %host_var,
                    "host environment variable is not set"
                );
                None
            },
        })
        .collect()
}

fn proxy_env(credentials: &Credentials) -> Vec<(String, String)> {
    let proxy = credentials.proxy_url();
    let mut env: Vec<(String, String)> = PROXY_ENV_VARS
        .iter()
        .map(|var| ((*var).to_string(), proxy.clone()))
        .collect();
    if !credentials.api_key.is_empty() {
        env.push((PROXY_TOKEN_VAR.to_string(), credentials.api_key.clone()));
    }
    env
}

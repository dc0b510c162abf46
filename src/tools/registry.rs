//! Tool registry: the merged catalog of local and remote tools.
//!
//! Remote catalogs are polled on an interval. Each refresh builds a complete
//! new `Catalog` and swaps it in behind a single `Arc`, so readers always see
//! one whole generation. The first reader starts the refresh task and waits
//! until the first pass has finished.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;

use super::{LocalTool, ToolError, ToolInfo, LOCAL_PROVIDER};
use crate::config::{ProviderRegistry, ToolFilter};
use crate::mcp_client::{McpInfo, ToolProvider};

// ─── Constants ───────────────────────────────────────────────────────────────

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// How often a cold-start caller checks whether the first refresh finished.
const FIRST_REFRESH_POLL: Duration = Duration::from_secs(1);

// ─── Tool Keys ───────────────────────────────────────────────────────────────

/// Stable key for a remote tool: base64url (no padding) of
/// SHA-256(`{server}_{tool}`).
pub fn derive_tool_key(server_name: &str, tool_name: &str) -> String {
    let digest = Sha256::digest(format!("{server_name}_{tool_name}").as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

// ─── RetryPolicy ─────────────────────────────────────────────────────────────

/// Which tools may be retried on failure.
///
/// Matching is by name prefix, a heuristic for read-only tools rather than a
/// guarantee.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    prefixes: Vec<String>,
    attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            prefixes: vec!["get".into(), "describe".into(), "list".into()],
            attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, tool_name: &str) -> bool {
        let name = tool_name.to_ascii_lowercase();
        self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    pub fn max_attempts(&self, tool_name: &str) -> u32 {
        if self.is_retryable(tool_name) {
            self.attempts
        } else {
            1
        }
    }
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// One immutable generation of remote tools.
#[derive(Debug, Default)]
pub struct Catalog {
    tools: Vec<ToolInfo>,
    by_key: HashMap<String, usize>,
}

impl Catalog {
    fn build(tools: Vec<ToolInfo>) -> Self {
        let by_key = tools
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.tool_key.clone(), idx))
            .collect();
        Self { tools, by_key }
    }

    pub fn get(&self, key: &str) -> Option<&ToolInfo> {
        self.by_key.get(key).map(|&idx| &self.tools[idx])
    }

    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

pub struct ToolRegistry {
    local: Vec<Arc<dyn LocalTool>>,
    providers: ProviderRegistry,
    client: Arc<dyn ToolProvider>,
    catalog: RwLock<Arc<Catalog>>,
    retry: RetryPolicy,
    refresh_interval: Duration,
    poll_interval: Duration,
    started: AtomicBool,
    refreshed: AtomicBool,
    exiting: AtomicBool,
    wake: Notify,
}

impl ToolRegistry {
    pub fn new(providers: ProviderRegistry, client: Arc<dyn ToolProvider>) -> Self {
        Self {
            local: Vec::new(),
            providers,
            client,
            catalog: RwLock::new(Arc::new(Catalog::default())),
            retry: RetryPolicy::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            poll_interval: FIRST_REFRESH_POLL,
            started: AtomicBool::new(false),
            refreshed: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn with_local_tool(mut self, tool: Arc<dyn LocalTool>) -> Self {
        self.local.push(tool);
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // ─── Reading ─────────────────────────────────────────────────────────

    /// Current remote catalog generation.
    pub fn snapshot(&self) -> Arc<Catalog> {
        match self.catalog.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Local tools followed by remote tools, filtered by provider.
    ///
    /// The first call starts the refresh task and waits for its first pass.
    pub async fn tools(self: &Arc<Self>, filter: &ToolFilter) -> Vec<ToolInfo> {
        self.wait_for_first_refresh().await;

        let snapshot = self.snapshot();
        self.local
            .iter()
            .map(|t| ToolInfo::from_local(t.as_ref()))
            .chain(snapshot.tools().iter().cloned())
            .filter(|t| filter.permits(&t.server_name))
            .collect()
    }

    /// Human-readable name parts for a key: `[tool]` for local tools,
    /// `[server, tool]` for remote ones. Unknown keys come back unchanged.
    pub fn convert_name(&self, key: &str) -> Vec<String> {
        if self.local_tool(key).is_some() {
            return vec![key.to_string()];
        }
        match self.snapshot().get(key) {
            Some(info) => vec![info.server_name.clone(), info.tool_name.clone()],
            None => vec![key.to_string()],
        }
    }

    fn local_tool(&self, name: &str) -> Option<&Arc<dyn LocalTool>> {
        self.local.iter().find(|t| t.name() == name)
    }

    // ─── Execution ───────────────────────────────────────────────────────

    /// Execute one call. `arguments` is the JSON text produced by the model.
    pub async fn execute(&self, key: &str, arguments: &str) -> Result<String, ToolError> {
        let args: serde_json::Value = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
                tool: key.to_string(),
                reason: e.to_string(),
            })?
        };

        if let Some(tool) = self.local_tool(key) {
            return tool.execute(args).await;
        }

        let snapshot = self.snapshot();
        let info = snapshot.get(key).ok_or_else(|| ToolError::UnknownTool {
            name: key.to_string(),
        })?;
        let provider: &McpInfo =
            self.providers
                .get(&info.server_name)
                .ok_or_else(|| ToolError::UnknownTool {
                    name: format!("{}.{}", info.server_name, info.tool_name),
                })?;

        tracing::info!(
            provider = %info.server_name,
            tool = %info.tool_name,
            "calling remote tool"
        );
        Ok(self
            .client
            .call_tool(provider, &info.tool_name, args)
            .await?)
    }

    /// Execute with the retry policy applied to the tool's own name.
    pub async fn execute_with_retry(&self, key: &str, arguments: &str) -> Result<String, ToolError> {
        let tool_name = self.convert_name(key).pop().unwrap_or_default();
        let attempts = self.retry.max_attempts(&tool_name);

        let mut attempt = 1;
        loop {
            match self.execute(key, arguments).await {
                Ok(out) => return Ok(out),
                Err(e) if attempt < attempts && !matches!(e, ToolError::UnknownTool { .. }) => {
                    tracing::warn!(
                        tool = %tool_name,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "tool call failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ─── Refresh ─────────────────────────────────────────────────────────

    /// Start the refresh task if needed and block until the first pass is done.
    pub async fn wait_for_first_refresh(self: &Arc<Self>) {
        if !self.started.swap(true, Ordering::SeqCst) {
            let registry = Arc::clone(self);
            tokio::spawn(async move { registry.refresh_loop().await });
            tracing::info!("tool catalog refresh started");
        }
        while !self.refreshed.load(Ordering::SeqCst) {
            if self.exiting.load(Ordering::SeqCst) {
                return;
            }
            tracing::debug!("waiting for first tool catalog refresh");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn refresh_loop(self: Arc<Self>) {
        loop {
            if self.exiting.load(Ordering::SeqCst) {
                break;
            }
            self.refresh_once().await;
            self.refreshed.store(true, Ordering::SeqCst);
            if self.exiting.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {}
                _ = self.wake.notified() => {}
            }
        }
        tracing::info!("tool catalog refresh stopped");
    }

    /// Poll every provider and swap in the merged result.
    ///
    /// A failing provider is logged and left out of this generation.
    pub async fn refresh_once(&self) {
        let fetches = self.providers.iter().map(|info| async move {
            (info, self.client.list_tools(info).await)
        });
        let results = futures::future::join_all(fetches).await;

        let mut tools = Vec::new();
        for (info, result) in results {
            match result {
                Ok(listed) => {
                    for tool in listed {
                        let description = match info.description.as_deref() {
                            Some(d) if !d.is_empty() => format!("{d}\n{}", tool.description),
                            _ => tool.description,
                        };
                        tools.push(ToolInfo {
                            tool_key: derive_tool_key(&info.name, &tool.name),
                            server_name: info.name.clone(),
                            tool_name: tool.name,
                            description,
                            input_schema: tool.input_schema,
                        });
                    }
                }
                Err(e) => {
                    tracing::error!(provider = %info, error = %e, "failed to list provider tools");
                }
            }
        }

        let catalog = Arc::new(Catalog::build(tools));
        let count = catalog.len();
        if catalog.is_empty() && !self.providers.is_empty() {
            tracing::warn!(
                providers = self.providers.len(),
                "no remote tools discovered this pass"
            );
        }
        match self.catalog.write() {
            Ok(mut guard) => *guard = catalog,
            Err(poisoned) => *poisoned.into_inner() = catalog,
        }
        tracing::info!(tools = count, "tool catalog refreshed");
    }

    /// Stop refreshing and release local tool resources.
    pub async fn shutdown(&self) {
        if self.exiting.swap(true, Ordering::SeqCst) {
            return;
        }
        // Leaves a permit when the loop is mid-refresh rather than sleeping
        self.wake.notify_one();
        for tool in &self.local {
            tool.shutdown().await;
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

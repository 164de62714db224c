pub mod agent_core;
pub mod config;
pub mod document;
pub mod inference;
pub mod mcp_client;
pub mod toolkit;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use agent_core::{AgentDatabase, ChatEngine, ChatSession, ConversationStore};
use config::EngineConfig;
use document::{AnchorMatcher, CommentStore, ProjectStore, ReverseCommentService};
use inference::{ModelProvider, ResponsesClient};
use mcp_client::CatalogLoader;
use toolkit::{register_builtin_tools, BuiltinToolDeps, CallRecordStore, ToolCallHandler, ToolRegistry};

/// Return the platform-standard data directory for the agent.
///
/// Falls back to `~/.manuscript-agent/` only if no data directory can be
/// resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.manuscript-agent");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".manuscript-agent")
}

/// Initialize the tracing subscriber, writing to `agent.log` in `log_dir`.
///
/// Existing logs are rotated first (agent.log → .1 → .2 → .3). With `json`
/// set, lines are emitted as JSON objects. Fails if a global subscriber is
/// already installed.
pub fn init_tracing(log_dir: &Path, json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let log_path = log_dir.join("agent.log");
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;
    let writer = FlushingWriter::new(log_file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("manuscript_agent=info,warn"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== manuscript agent starting ==="
    );
    Ok(())
}

/// Rotate log files: `agent.log` → `agent.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so
/// log lines reach disk even if the process dies.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Bootstrap ───────────────────────────────────────────────────────────────

/// Everything a host needs to serve conversations.
pub struct Engine {
    pub session: ChatSession,
    pub chat: ChatEngine,
    pub registry: Arc<ToolRegistry>,
    pub records: CallRecordStore,
    pub comments: CommentStore,
}

/// Resolve the path for the agent SQLite database, creating its directory.
fn resolve_db_path(config: &EngineConfig) -> anyhow::Result<PathBuf> {
    let path = match &config.database.path {
        Some(path) => PathBuf::from(path),
        None => data_dir().join("agent.db"),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(path)
}

/// Wire the engine against the configured Responses endpoint.
pub async fn bootstrap(
    config: &EngineConfig,
    projects: Arc<dyn ProjectStore>,
) -> anyhow::Result<Engine> {
    let provider = ResponsesClient::from_config(&config.provider)
        .context("failed to build model provider client")?;
    bootstrap_with_provider(config, projects, Arc::new(provider)).await
}

/// Wire the engine around an existing model provider.
///
/// A catalog that cannot be reached is logged and skipped; the built-in
/// tools are always registered.
pub async fn bootstrap_with_provider(
    config: &EngineConfig,
    projects: Arc<dyn ProjectStore>,
    provider: Arc<dyn ModelProvider>,
) -> anyhow::Result<Engine> {
    let db_path = resolve_db_path(config)?;
    let db_path_str = db_path.to_string_lossy();
    let db = AgentDatabase::open(&db_path_str, config.database.pool_size)
        .with_context(|| format!("failed to open database at {db_path_str}"))?;
    tracing::info!(path = %db_path_str, "agent database opened");

    let records = CallRecordStore::new(db.clone())
        .with_timeout_bypass(config.tools.timeout_bypasses_cooldown);
    let comments = CommentStore::new(db.clone());
    let matcher = AnchorMatcher::new(
        config.reconciler.similarity_threshold,
        config.reconciler.chunk_size,
    );
    let reverse_comments = ReverseCommentService::new(projects.clone(), comments.clone(), matcher);

    let mut registry = ToolRegistry::new();
    register_builtin_tools(
        &mut registry,
        BuiltinToolDeps {
            projects,
            records: records.clone(),
            reverse_comments,
            config: config.tools.clone(),
        },
    )
    .context("failed to register built-in tools")?;

    if let Some(uri) = config.catalog.uri.as_deref().filter(|u| !u.is_empty()) {
        load_catalog(config, uri, records.clone(), &mut registry).await;
    }

    let registry = Arc::new(registry);
    tracing::info!(tools = registry.len(), "tool registry ready");

    let handler = ToolCallHandler::new(registry.clone())
        .with_parallel_dispatch(config.tools.parallel_dispatch);
    let chat = ChatEngine::new(provider, handler).with_max_rounds(config.orchestrator.max_rounds);
    let session = ChatSession::new(
        chat.clone(),
        ConversationStore::new(db),
        config.provider.default_model,
        config.orchestrator.title_model,
    );

    Ok(Engine {
        session,
        chat,
        registry,
        records,
        comments,
    })
}

async fn load_catalog(
    config: &EngineConfig,
    uri: &str,
    records: CallRecordStore,
    registry: &mut ToolRegistry,
) {
    let timeout = Duration::from_secs(config.catalog.timeout_secs);
    let mut loader = match CatalogLoader::new(uri, &config.catalog.client_name, timeout, records) {
        Ok(loader) => loader,
        Err(e) => {
            tracing::error!(uri = %uri, error = %e, "failed to create catalog loader");
            return;
        }
    };
    if let Err(e) = loader.initialize().await {
        tracing::error!(uri = %uri, error = %e, "catalog unavailable, continuing with built-in tools");
        return;
    }
    match loader.load_tools(registry).await {
        Ok(count) => tracing::info!(uri = %uri, count, "catalog tools loaded"),
        Err(e) => tracing::error!(uri = %uri, error = %e, "failed to load catalog tools"),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

//! Engine configuration loading.
//!
//! Reads `config/engine.yaml` and resolves environment variables before
//! parsing. Every section has defaults, so an empty document is a valid
//! configuration and deployments only spell out what they change.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::inference::LanguageModel;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Configuration loading or validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be located.
    #[error("config not found: {reason}")]
    NotFound { reason: String },

    /// The configuration file could not be read.
    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    /// The YAML document did not match the expected shape.
    #[error("failed to parse config: {reason}")]
    Parse { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level engine configuration (mirrors `config/engine.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Model provider endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub default_model: LanguageModel,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound for one streamed round, first byte to last.
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            default_model: LanguageModel::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            stream_timeout_secs: default_stream_timeout_secs(),
        }
    }
}

/// Remote tool catalog. When `uri` is absent only built-in tools are served.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            uri: None,
            client_name: default_client_name(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// Built-in tool endpoints and call-record policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_paper_score_url")]
    pub paper_score_url: String,
    #[serde(default = "default_paper_score_comment_url")]
    pub paper_score_comment_url: String,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    /// A `timeout` record does not block the next call while this is set.
    #[serde(default = "default_true")]
    pub timeout_bypasses_cooldown: bool,
    /// Dispatch the tool calls of one round concurrently.
    #[serde(default)]
    pub parallel_dispatch: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            paper_score_url: default_paper_score_url(),
            paper_score_comment_url: default_paper_score_comment_url(),
            cooldown_secs: default_cooldown_secs(),
            timeout_secs: default_tool_timeout_secs(),
            timeout_bypasses_cooldown: true,
            parallel_dispatch: false,
        }
    }
}

/// Anchor reconciliation tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Orchestration loop limits.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_title_model")]
    pub title_model: LanguageModel,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            title_model: default_title_model(),
        }
    }
}

/// SQLite location and pool sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `agent.db` inside the data directory.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: default_pool_size(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_stream_timeout_secs() -> u64 {
    300
}
fn default_client_name() -> String {
    "manuscript-agent".into()
}
fn default_tool_timeout_secs() -> u64 {
    600
}
fn default_paper_score_url() -> String {
    "http://localhost:8000/paper-score".into()
}
fn default_paper_score_comment_url() -> String {
    "http://localhost:8000/paper-score-comments".into()
}
fn default_cooldown_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_similarity_threshold() -> f64 {
    0.65
}
fn default_chunk_size() -> usize {
    1000
}
fn default_max_rounds() -> usize {
    20
}
fn default_title_model() -> LanguageModel {
    LanguageModel::Gpt41Mini
}
fn default_pool_size() -> u32 {
    8
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the engine configuration file.
///
/// Checks `MANUSCRIPT_AGENT_CONFIG` first, then searches upward from `start`
/// for `config/engine.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    if let Ok(explicit) = std::env::var("MANUSCRIPT_AGENT_CONFIG") {
        let candidate = PathBuf::from(&explicit);
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %explicit, "MANUSCRIPT_AGENT_CONFIG points to a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join("config/engine.yaml");
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound {
        reason: format!("no config/engine.yaml above {}", start.display()),
    })
}

/// Load and parse the engine configuration file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

/// Parse a YAML document into an [`EngineConfig`].
pub fn parse_config(raw: &str) -> Result<EngineConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__MA_TEST_MISSING_VAR__");
        let result = interpolate_env_vars("${__MA_TEST_MISSING_VAR__:-http://fallback}");
        assert_eq!(result, "http://fallback");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__MA_TEST_API_KEY__", "sk-test");
        let result = interpolate_env_vars("api_key: ${__MA_TEST_API_KEY__}");
        assert_eq!(result, "api_key: sk-test");
        std::env::remove_var("__MA_TEST_API_KEY__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain: text";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/papers");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/papers"));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.tools.cooldown_secs, 300);
        assert!(config.tools.timeout_bypasses_cooldown);
        assert!(!config.tools.parallel_dispatch);
        assert_eq!(config.reconciler.chunk_size, 1000);
        assert!((config.reconciler.similarity_threshold - 0.65).abs() < f64::EPSILON);
        assert_eq!(config.orchestrator.max_rounds, 20);
        assert_eq!(config.orchestrator.title_model, LanguageModel::Gpt41Mini);
        assert!(config.catalog.uri.is_none());
    }

    #[test]
    fn test_partial_sections_override_defaults() {
        let yaml = r#"
            provider:
              base_url: "http://localhost:9999/v1"
              default_model: gpt-4.1
            tools:
              cooldown_secs: 60
              parallel_dispatch: true
            catalog:
              uri: "http://catalog:8080/mcp"
        "#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.provider.base_url, "http://localhost:9999/v1");
        assert_eq!(config.provider.default_model, LanguageModel::Gpt41);
        assert_eq!(config.provider.connect_timeout_secs, 5);
        assert_eq!(config.tools.cooldown_secs, 60);
        assert!(config.tools.parallel_dispatch);
        assert_eq!(config.catalog.uri.as_deref(), Some("http://catalog:8080/mcp"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "orchestrator:\n  max_rounds: 3\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.orchestrator.max_rounds, 3);
    }

    #[test]
    fn test_find_config_path_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(dir.path().join("config/engine.yaml"), "").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_path(&nested).unwrap();
        assert!(found.ends_with("config/engine.yaml"));
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let err = parse_config("tools: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}

//! Built-in tools backed by the paper scoring service.
//!
//! Both tools take no model arguments: everything they need comes from the
//! tool context and the synced project.

pub mod paper_score;
pub mod paper_score_comment;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ToolsConfig;
use crate::document::{Project, ProjectStore, ReverseCommentService};

use super::errors::ToolError;
use super::records::CallRecordStore;
use super::registry::ToolRegistry;
use super::types::ToolContext;

pub use paper_score::{PaperScoreResult, PaperScoreTool, PAPER_SCORE};
pub use paper_score_comment::{PaperScoreCommentTool, PAPER_SCORE_COMMENT};

/// Collaborators shared by the built-in tools.
#[derive(Clone)]
pub struct BuiltinToolDeps {
    pub projects: Arc<dyn ProjectStore>,
    pub records: CallRecordStore,
    pub reverse_comments: ReverseCommentService,
    pub config: ToolsConfig,
}

/// Register `paper_score` and `paper_score_comment`.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    deps: BuiltinToolDeps,
) -> Result<(), ToolError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(deps.config.timeout_secs))
        .build()
        .map_err(|e| ToolError::Transport {
            endpoint: deps.config.paper_score_url.clone(),
            reason: format!("failed to build HTTP client: {e}"),
        })?;

    let score = PaperScoreTool::new(&deps, http.clone());
    registry.register(PAPER_SCORE, PaperScoreTool::descriptor(), Arc::new(score));

    let comment = PaperScoreCommentTool::new(&deps, http);
    registry.register(
        PAPER_SCORE_COMMENT,
        PaperScoreCommentTool::descriptor(),
        Arc::new(comment),
    );

    tracing::info!(tools = registry.len(), "built-in tools registered");
    Ok(())
}

/// Load the caller's project and its flattened source.
async fn load_project(
    projects: &dyn ProjectStore,
    ctx: &ToolContext,
) -> Result<(Project, String), ToolError> {
    ctx.require_complete()?;
    let project = projects
        .get_project(&ctx.actor_id, &ctx.project_id)
        .await
        .map_err(|e| ToolError::failed(format!("failed to get project: {e}")))?;
    let full_content = project
        .full_content()
        .map_err(|e| ToolError::failed(format!("failed to get paper full content: {e}")))?;
    Ok((project, full_content))
}

/// A failed scoring-service request.
struct ServiceFailure {
    timed_out: bool,
    error: ToolError,
}

impl ServiceFailure {
    /// Record the failure on the pending call record and hand back the error.
    fn settle(self, records: &CallRecordStore, record_id: &str) -> ToolError {
        let settled = if self.timed_out {
            records.mark_timeout(record_id)
        } else {
            records.mark_error(record_id, &self.error.to_string())
        };
        if let Err(e) = settled {
            tracing::error!(record_id = %record_id, error = %e, "failed to settle call record");
        }
        self.error
    }
}

/// POST a JSON body and decode a JSON reply.
async fn post_json<B, T>(http: &reqwest::Client, url: &str, body: &B) -> Result<T, ServiceFailure>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let transport = |timed_out: bool, reason: String| ServiceFailure {
        timed_out,
        error: ToolError::Transport {
            endpoint: url.to_string(),
            reason,
        },
    };

    let response = http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| transport(e.is_timeout(), format!("failed to send request: {e}")))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| transport(e.is_timeout(), format!("failed to read response body: {e}")))?;

    if !status.is_success() {
        return Err(ServiceFailure {
            timed_out: false,
            error: ToolError::failed(format!("service returned {status}: {text}")),
        });
    }

    serde_json::from_str(&text).map_err(|e| ServiceFailure {
        timed_out: false,
        error: ToolError::failed(format!(
            "failed to unmarshal response body: {e}, body: {text}"
        )),
    })
}

// ─── Test fixtures ───────────────────────────────────────────────────────────

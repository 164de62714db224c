//! `paper_score`: score the whole paper through the scoring service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::document::ProjectStore;
use crate::inference::types::ToolDescriptor;
use crate::toolkit::errors::ToolError;
use crate::toolkit::records::CallRecordStore;
use crate::toolkit::types::{ToolContext, ToolHandler, ToolOutput};

use super::{load_project, post_json, BuiltinToolDeps};

pub const PAPER_SCORE: &str = "paper_score";

const DESCRIPTION: &str = "Scoring the paper and get the score, percentile, details, and suggestions. \
After the score is generated, you can call the paper_score_comment function to get the actionable \
comment for the paper score.";

const FURTHER_INSTRUCTION: &str =
    "Then, call the paper_score_comment function to get the actionable comment for the paper score.";

/// Scoring service reply. Fields beyond score and percentile (details,
/// suggestions) are kept verbatim for the comment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperScoreResult {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub percentile: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub struct PaperScoreTool {
    projects: Arc<dyn ProjectStore>,
    records: CallRecordStore,
    http: reqwest::Client,
    url: String,
    cooldown: Duration,
}

impl PaperScoreTool {
    pub fn new(deps: &BuiltinToolDeps, http: reqwest::Client) -> Self {
        Self {
            projects: deps.projects.clone(),
            records: deps.records.clone(),
            http,
            url: deps.config.paper_score_url.clone(),
            cooldown: Duration::from_secs(deps.config.cooldown_secs),
        }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::without_parameters(PAPER_SCORE, DESCRIPTION)
    }
}

#[async_trait]
impl ToolHandler for PaperScoreTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        call_id: &str,
        _args: &str,
    ) -> Result<ToolOutput, ToolError> {
        let (project, latex_source) = load_project(self.projects.as_ref(), ctx).await?;
        let category = project
            .category
            .as_ref()
            .map(|c| c.category.clone())
            .ok_or_else(|| ToolError::failed("failed to get paper category: project is not categorised"))?;

        self.records
            .check_cooldown(PAPER_SCORE, &ctx.actor_id, &ctx.project_id, self.cooldown)?;

        let body = json!({ "latexSource": latex_source, "category": category });
        let record = self.records.create(ctx, call_id, PAPER_SCORE, &body)?;

        tracing::info!(project_id = %ctx.project_id, record_id = %record.id, "requesting paper score");
        let result: PaperScoreResult = match post_json(&self.http, &self.url, &body).await {
            Ok(result) => result,
            Err(failure) => {
                let e = failure.settle(&self.records, &record.id);
                return Err(ToolError::failed(format!("failed to score paper: {e}")));
            }
        };

        let raw = serde_json::to_string(&result)?;
        self.records.mark_success(&record.id, &raw)?;

        // Details and suggestions stay in the record; the model only sees the headline.
        let summary = json!({ "score": result.score, "percentile": result.percentile });
        Ok(ToolOutput::with_instruction(summary.to_string(), FURTHER_INSTRUCTION))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

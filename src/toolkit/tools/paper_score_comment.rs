//! `paper_score_comment`: turn the latest paper score into anchored comments.
//!
//! The score is read back from the `paper_score` call record rather than
//! passed through the model, whose copy of it may be altered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::document::{CritiqueBatch, ProjectStore, ReverseCommentService};
use crate::inference::types::ToolDescriptor;
use crate::toolkit::errors::ToolError;
use crate::toolkit::records::{CallRecord, CallRecordStore, CallStatus};
use crate::toolkit::types::{ToolContext, ToolHandler, ToolOutput};

use super::paper_score::{PaperScoreResult, PAPER_SCORE};
use super::{load_project, post_json, BuiltinToolDeps};

pub const PAPER_SCORE_COMMENT: &str = "paper_score_comment";

const DESCRIPTION: &str = "Get the actionable comment for the paper score. \
usually the comment is about the weakness of the paper.";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentRequest<'a> {
    latex_source: &'a str,
    paper_score_result: &'a PaperScoreResult,
}

pub struct PaperScoreCommentTool {
    projects: Arc<dyn ProjectStore>,
    records: CallRecordStore,
    reverse_comments: ReverseCommentService,
    http: reqwest::Client,
    url: String,
    cooldown: Duration,
}

impl PaperScoreCommentTool {
    pub fn new(deps: &BuiltinToolDeps, http: reqwest::Client) -> Self {
        Self {
            projects: deps.projects.clone(),
            records: deps.records.clone(),
            reverse_comments: deps.reverse_comments.clone(),
            http,
            url: deps.config.paper_score_comment_url.clone(),
            cooldown: Duration::from_secs(deps.config.cooldown_secs),
        }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::without_parameters(PAPER_SCORE_COMMENT, DESCRIPTION)
    }
}

/// The score a comment request builds on, or why there is none yet.
fn usable_score(latest: Option<CallRecord>) -> Result<PaperScoreResult, ToolError> {
    let record = match latest {
        Some(r) if r.status == CallStatus::Success => r,
        Some(r) => {
            let advice = match r.status {
                CallStatus::Pending => "please wait for a few minutes and try again.",
                _ => "please rerun the paper score function.",
            };
            return Err(ToolError::failed(format!(
                "paper score is {}, paper score comments cannot be generated. {advice}",
                r.status
            )));
        }
        None => {
            return Err(ToolError::failed(
                "paper score is not completed, paper score comments cannot be generated. please try again.",
            ))
        }
    };

    let raw = record.result.unwrap_or_default();
    serde_json::from_str(&raw)
        .map_err(|e| ToolError::failed(format!("failed to unmarshal paper score result: {e}")))
}

#[async_trait]
impl ToolHandler for PaperScoreCommentTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        call_id: &str,
        _args: &str,
    ) -> Result<ToolOutput, ToolError> {
        let (_, latex_source) = load_project(self.projects.as_ref(), ctx).await?;
        self.records.check_cooldown(
            PAPER_SCORE_COMMENT,
            &ctx.actor_id,
            &ctx.project_id,
            self.cooldown,
        )?;

        let latest = self
            .records
            .get_latest(PAPER_SCORE, &ctx.actor_id, &ctx.project_id)?;
        let score = usable_score(latest)?;

        let params = json!({ "latexSource": latex_source, "paperScoreResult": score });
        let record = self.records.create(ctx, call_id, PAPER_SCORE_COMMENT, &params)?;

        let request = CommentRequest {
            latex_source: &latex_source,
            paper_score_result: &score,
        };
        let batch: CritiqueBatch = match post_json(&self.http, &self.url, &request).await {
            Ok(batch) => batch,
            Err(failure) => {
                let e = failure.settle(&self.records, &record.id);
                return Err(ToolError::failed(format!(
                    "failed to execute paper score comment: {e}"
                )));
            }
        };

        let comments = match self
            .reverse_comments
            .reverse_comments(&ctx.actor_id, &ctx.project_id, &batch)
            .await
        {
            Ok(comments) => comments,
            Err(e) => {
                let reason = format!("failed to reverse comments: {e}");
                self.records.mark_error(&record.id, &reason)?;
                return Err(ToolError::failed(reason));
            }
        };

        let stored = json!({ "paperScoreCommentResult": batch, "comments": comments });
        self.records.mark_success(&record.id, &stored.to_string())?;

        tracing::info!(
            project_id = %ctx.project_id,
            critiques = batch.results.len(),
            comments = comments.len(),
            "paper score comments generated"
        );
        Ok(ToolOutput::text(serde_json::to_string(&comments)?))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

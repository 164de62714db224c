//! Document error types.

use thiserror::Error;

use crate::toolkit::ToolError;

/// Errors from project lookup, LaTeX expansion, and comment anchoring.
///
/// `SectionNotFound` and `NoAnchorMatch` are recovered locally by the
/// reverse-comment service: the critique is dropped, not reported.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// No document contains a header matching the target section.
    #[error("section not found: '{section}'")]
    SectionNotFound { section: String },

    /// The anchor text could not be placed in the document.
    #[error("no sufficiently similar match for anchor in '{doc_path}'")]
    NoAnchorMatch { doc_path: String },

    /// The project's root document is missing from its doc list.
    #[error("root doc not found: '{root_doc_id}'")]
    RootDocNotFound { root_doc_id: String },

    /// The project store has no such project for this actor.
    #[error("project not found: '{project_id}'")]
    ProjectNotFound { project_id: String },

    /// Comment persistence failed.
    #[error("database error: {reason}")]
    Database { reason: String },
}

impl From<rusqlite::Error> for DocumentError {
    fn from(e: rusqlite::Error) -> Self {
        DocumentError::Database {
            reason: e.to_string(),
        }
    }
}

impl From<r2d2::Error> for DocumentError {
    fn from(e: r2d2::Error) -> Self {
        DocumentError::Database {
            reason: format!("connection pool: {e}"),
        }
    }
}

impl From<DocumentError> for ToolError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::Database { reason } => ToolError::Database { reason },
            other => ToolError::ExecutionFailed {
                reason: other.to_string(),
            },
        }
    }
}

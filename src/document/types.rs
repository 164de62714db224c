//! Shared types for projects, critiques, and anchored comments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minutes a synced project stays fresh.
const PROJECT_FRESHNESS_MINUTES: i64 = 30;

// ─── Projects ───────────────────────────────────────────────────────────────

/// One file of a project, stored as lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDoc {
    pub id: String,
    pub version: i64,
    pub filepath: String,
    pub lines: Vec<String>,
}

impl ProjectDoc {
    /// Lines joined with `\n`: the content positions are measured against.
    pub fn content(&self) -> String {
        self.lines.join("\n")
    }
}

/// Subject classification of a paper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCategory {
    pub category: String,
    #[serde(default)]
    pub confidence: i64,
    #[serde(default)]
    pub explanation: String,
}

/// A document tree: ordered files with a designated root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub root_doc_id: String,
    pub docs: Vec<ProjectDoc>,
    #[serde(default)]
    pub category: Option<ProjectCategory>,
    #[serde(default)]
    pub instructions: String,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn root_doc(&self) -> Option<&ProjectDoc> {
        self.docs.iter().find(|d| d.id == self.root_doc_id)
    }

    /// Whether the last sync is older than the freshness window.
    pub fn is_out_of_date(&self) -> bool {
        self.is_out_of_date_at(Utc::now())
    }

    pub fn is_out_of_date_at(&self, now: DateTime<Utc>) -> bool {
        self.updated_at < now - chrono::Duration::minutes(PROJECT_FRESHNESS_MINUTES)
    }
}

// ─── Anchors ────────────────────────────────────────────────────────────────

/// Where an anchor landed in a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorMatch {
    /// Zero-based offset in Unicode code points.
    pub position: usize,
    /// Document text at the match, verbatim.
    pub matched_text: String,
    /// 1.0 for exact matches, normalized Levenshtein similarity otherwise.
    pub similarity: f64,
}

// ─── Critiques & comments ───────────────────────────────────────────────────

/// One critique produced by the comment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub anchor_text: String,
    #[serde(default)]
    pub weakness: String,
    #[serde(default)]
    pub importance: String,
}

/// Response body of the comment service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueBatch {
    #[serde(default)]
    pub results: Vec<Critique>,
}

/// Review status of a stored comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentStatus {
    NoAction,
    Accepted,
    Rejected,
}

impl CommentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommentStatus::NoAction => "no_action",
            CommentStatus::Accepted => "accepted",
            CommentStatus::Rejected => "rejected",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "accepted" => CommentStatus::Accepted,
            "rejected" => CommentStatus::Rejected,
            _ => CommentStatus::NoAction,
        }
    }
}

/// A stored, anchored comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: String,
    pub actor_id: String,
    pub project_id: String,
    pub doc_id: String,
    pub doc_version: i64,
    pub doc_sha1: String,
    pub quote_position: usize,
    pub quote_text: String,
    pub comment: String,
    pub importance: String,
    pub status: CommentStatus,
    pub doc_path: String,
    pub section: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Client view of an anchored comment, ready to insert into the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverleafComment {
    pub comment_id: String,
    pub project_id: String,
    pub doc_id: String,
    pub doc_version: i64,
    pub doc_sha1: String,
    pub quote_position: usize,
    pub quote_text: String,
    pub comment: String,
    pub importance: String,
    pub doc_path: String,
    pub section: String,
}

impl From<&CommentRecord> for OverleafComment {
    fn from(r: &CommentRecord) -> Self {
        Self {
            comment_id: r.id.clone(),
            project_id: r.project_id.clone(),
            doc_id: r.doc_id.clone(),
            doc_version: r.doc_version,
            doc_sha1: r.doc_sha1.clone(),
            quote_position: r.quote_position,
            quote_text: r.quote_text.clone(),
            comment: r.comment.clone(),
            importance: r.importance.clone(),
            doc_path: r.doc_path.clone(),
            section: r.section.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(updated_at: DateTime<Utc>) -> Project {
        Project {
            id: "p1".into(),
            name: "paper".into(),
            root_doc_id: "d1".into(),
            docs: vec![ProjectDoc {
                id: "d1".into(),
                version: 3,
                filepath: "main.tex".into(),
                lines: vec!["a".into(), "b".into()],
            }],
            category: None,
            instructions: String::new(),
            updated_at,
        }
    }

    #[test]
    fn test_out_of_date_after_thirty_minutes() {
        let now = Utc::now();
        assert!(!project(now - chrono::Duration::minutes(29)).is_out_of_date_at(now));
        assert!(project(now - chrono::Duration::minutes(31)).is_out_of_date_at(now));
    }

    #[test]
    fn test_root_doc_and_content() {
        let p = project(Utc::now());
        assert_eq!(p.root_doc().unwrap().content(), "a\nb");
    }

    #[test]
    fn test_critique_batch_accepts_missing_fields() {
        let batch: CritiqueBatch = serde_json::from_str(
            r#"{"results":[{"section":"Intro","anchor_text":"We propose"}]}"#,
        )
        .unwrap();
        assert_eq!(batch.results[0].section, "Intro");
        assert!(batch.results[0].weakness.is_empty());
    }
}

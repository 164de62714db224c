//! Reverse comments: turn free-text critiques into anchored editor comments.
//!
//! Each critique names a section and quotes an anchor. The section picks the
//! file, the anchor picks the position, and every critique that lands is
//! stored as a `no_action` comment. Critiques that cannot be placed are
//! dropped with an info log.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::agent_core::database::{from_millis, now_millis, AgentDatabase};

use super::anchor::{doc_sha1, AnchorMatcher};
use super::errors::DocumentError;
use super::sections::find_target_doc;
use super::store::ProjectStore;
use super::types::{
    AnchorMatch, CommentRecord, CommentStatus, Critique, CritiqueBatch, OverleafComment, Project,
    ProjectDoc,
};

// ─── Comment store ───────────────────────────────────────────────────────────

/// Persistence for anchored comments.
#[derive(Clone)]
pub struct CommentStore {
    db: AgentDatabase,
}

impl CommentStore {
    pub fn new(db: AgentDatabase) -> Self {
        Self { db }
    }

    pub fn insert(&self, record: &CommentRecord) -> Result<(), DocumentError> {
        let conn = self.db.get_conn()?;
        conn.execute(
            "INSERT INTO comments
                (id, actor_id, project_id, doc_id, doc_version, doc_sha1, quote_position,
                 quote_text, comment, importance, doc_path, section, status,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                record.id,
                record.actor_id,
                record.project_id,
                record.doc_id,
                record.doc_version,
                record.doc_sha1,
                record.quote_position as i64,
                record.quote_text,
                record.comment,
                record.importance,
                record.doc_path,
                record.section,
                record.status.as_str(),
                record.created_at.timestamp_millis(),
                record.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// A comment owned by this actor and project.
    pub fn get_comment(
        &self,
        actor_id: &str,
        project_id: &str,
        comment_id: &str,
    ) -> Result<Option<CommentRecord>, DocumentError> {
        let conn = self.db.get_conn()?;
        let record = conn
            .query_row(
                "SELECT id, actor_id, project_id, doc_id, doc_version, doc_sha1, quote_position,
                        quote_text, comment, importance, doc_path, section, status,
                        created_at, updated_at
                   FROM comments
                  WHERE id = ?1 AND actor_id = ?2 AND project_id = ?3",
                params![comment_id, actor_id, project_id],
                |row| {
                    Ok(CommentRecord {
                        id: row.get(0)?,
                        actor_id: row.get(1)?,
                        project_id: row.get(2)?,
                        doc_id: row.get(3)?,
                        doc_version: row.get(4)?,
                        doc_sha1: row.get(5)?,
                        quote_position: row.get::<_, i64>(6)?.max(0) as usize,
                        quote_text: row.get(7)?,
                        comment: row.get(8)?,
                        importance: row.get(9)?,
                        doc_path: row.get(10)?,
                        section: row.get(11)?,
                        status: CommentStatus::parse(&row.get::<_, String>(12)?),
                        created_at: from_millis(row.get(13)?),
                        updated_at: from_millis(row.get(14)?),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Set the review status of the given comments. Ids belonging to another
    /// actor or project are skipped. Returns the number of comments updated.
    pub fn mark_status(
        &self,
        actor_id: &str,
        project_id: &str,
        comment_ids: &[String],
        status: CommentStatus,
    ) -> Result<usize, DocumentError> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        let now = now_millis();
        let mut updated = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE comments SET status = ?1, updated_at = ?2
                  WHERE id = ?3 AND actor_id = ?4 AND project_id = ?5",
            )?;
            for id in comment_ids {
                updated += stmt.execute(params![status.as_str(), now, id, actor_id, project_id])?;
            }
        }
        tx.commit()?;

        if updated < comment_ids.len() {
            tracing::warn!(
                requested = comment_ids.len(),
                updated,
                "some comments were not found for this actor and project"
            );
        }
        Ok(updated)
    }
}

// ─── Reverse-comment service ────────────────────────────────────────────────

/// A critique that found its file and position.
struct Placement {
    critique: Critique,
    comment: String,
    doc: ProjectDoc,
    doc_sha1: String,
    anchor: AnchorMatch,
}

/// Anchors critiques into a project's documents and stores them.
#[derive(Clone)]
pub struct ReverseCommentService {
    projects: Arc<dyn ProjectStore>,
    comments: CommentStore,
    matcher: AnchorMatcher,
}

impl ReverseCommentService {
    pub fn new(projects: Arc<dyn ProjectStore>, comments: CommentStore, matcher: AnchorMatcher) -> Self {
        Self {
            projects,
            comments,
            matcher,
        }
    }

    pub fn comments(&self) -> &CommentStore {
        &self.comments
    }

    /// Anchor every critique of `batch` into the actor's project. Only the
    /// critiques that could be placed are returned.
    pub async fn reverse_comments(
        &self,
        actor_id: &str,
        project_id: &str,
        batch: &CritiqueBatch,
    ) -> Result<Vec<OverleafComment>, DocumentError> {
        let project = self.projects.get_project(actor_id, project_id).await?;
        let critiques = batch.results.clone();
        let matcher = self.matcher;

        // Fuzzy matching is CPU-bound and fans out on the rayon pool.
        let placements =
            match tokio::task::spawn_blocking(move || place_all(&project, critiques, &matcher)).await {
                Ok(placements) => placements,
                Err(e) => {
                    tracing::error!(error = %e, "comment placement task failed");
                    Vec::new()
                }
            };

        let mut out = Vec::with_capacity(placements.len());
        for p in placements {
            let now = Utc::now();
            let record = CommentRecord {
                id: Uuid::new_v4().to_string(),
                actor_id: actor_id.to_string(),
                project_id: project_id.to_string(),
                doc_id: p.doc.id.clone(),
                doc_version: p.doc.version,
                doc_sha1: p.doc_sha1,
                quote_position: p.anchor.position,
                quote_text: p.anchor.matched_text,
                comment: p.comment,
                importance: p.critique.importance,
                status: CommentStatus::NoAction,
                doc_path: p.doc.filepath.clone(),
                section: p.critique.section,
                created_at: now,
                updated_at: now,
            };
            self.comments.insert(&record)?;
            out.push(OverleafComment::from(&record));
        }

        tracing::info!(
            project_id = %project_id,
            critiques = batch.results.len(),
            anchored = out.len(),
            "critiques reversed into comments"
        );
        Ok(out)
    }
}

fn place_all(project: &Project, critiques: Vec<Critique>, matcher: &AnchorMatcher) -> Vec<Placement> {
    critiques
        .into_iter()
        .filter_map(|critique| place(project, critique, matcher))
        .collect()
}

fn place(project: &Project, mut critique: Critique, matcher: &AnchorMatcher) -> Option<Placement> {
    let doc = match find_target_doc(project, &critique.section) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::info!(section = %critique.section, reason = %e, "critique dropped");
            return None;
        }
    };

    critique.anchor_text = critique.anchor_text.trim().to_string();
    let comment = format!("👨🏻‍💻 {}: {}", critique.importance, critique.weakness);
    let content = doc.content();

    let Some(anchor) = matcher.find_best_match(&content, &critique.anchor_text) else {
        let e = DocumentError::NoAnchorMatch {
            doc_path: doc.filepath.clone(),
        };
        tracing::info!(section = %critique.section, reason = %e, "critique dropped");
        return None;
    };

    Some(Placement {
        comment,
        doc_sha1: doc_sha1(&content),
        doc: doc.clone(),
        anchor,
        critique,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::store::InMemoryProjectStore;

    fn project() -> Project {
        let doc = |id: &str, path: &str, text: &str| ProjectDoc {
            id: id.into(),
            version: 7,
            filepath: path.into(),
            lines: text.lines().map(str::to_string).collect(),
        };
        Project {
            id: "p1".into(),
            name: "paper".into(),
            root_doc_id: "main".into(),
            docs: vec![
                doc("main", "main.tex", "\\section{Introduction}\n\\input{intro}\n\\section{Method}\nWe train a model."),
                doc("intro", "intro.tex", "Large models are costly.\nWe propose a cheap alternative."),
            ],
            category: None,
            instructions: String::new(),
            updated_at: Utc::now(),
        }
    }

    fn service() -> ReverseCommentService {
        let store = InMemoryProjectStore::new();
        store.upsert("alice", project());
        let db = AgentDatabase::open_in_memory().unwrap();
        ReverseCommentService::new(Arc::new(store), CommentStore::new(db), AnchorMatcher::default())
    }

    fn critique(section: &str, anchor: &str) -> Critique {
        Critique {
            section: section.into(),
            anchor_text: anchor.into(),
            weakness: "Claim is unsupported".into(),
            importance: "Major".into(),
        }
    }

    #[tokio::test]
    async fn test_placeable_critiques_become_stored_comments() {
        let svc = service();
        let batch = CritiqueBatch {
            results: vec![
                critique("Introduction", "  We propose a cheap alternative. "),
                critique("Conclusion", "anything"),
                critique("Method", "completely unrelated sentence about zebras"),
            ],
        };

        let comments = svc.reverse_comments("alice", "p1", &batch).await.unwrap();
        assert_eq!(comments.len(), 1);

        let c = &comments[0];
        assert_eq!(c.doc_id, "intro");
        assert_eq!(c.doc_path, "intro.tex");
        assert_eq!(c.doc_version, 7);
        assert_eq!(c.quote_position, "Large models are costly.\n".chars().count());
        assert_eq!(c.quote_text, "We propose a cheap alternative.");
        assert_eq!(c.comment, "👨🏻‍💻 Major: Claim is unsupported");
        assert_eq!(
            c.doc_sha1,
            doc_sha1("Large models are costly.\nWe propose a cheap alternative.")
        );

        let stored = svc
            .comments()
            .get_comment("alice", "p1", &c.comment_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, CommentStatus::NoAction);
        assert_eq!(stored.section, "Introduction");
    }

    #[tokio::test]
    async fn test_unknown_project_is_an_error() {
        let err = service()
            .reverse_comments("bob", "p1", &CritiqueBatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::ProjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_mark_status_is_scoped_to_owner() {
        let svc = service();
        let batch = CritiqueBatch {
            results: vec![critique("Method", "We train a model.")],
        };
        let comments = svc.reverse_comments("alice", "p1", &batch).await.unwrap();
        let ids = vec![comments[0].comment_id.clone(), "missing".to_string()];

        assert_eq!(
            svc.comments()
                .mark_status("bob", "p1", &ids, CommentStatus::Accepted)
                .unwrap(),
            0
        );
        assert_eq!(
            svc.comments()
                .mark_status("alice", "p1", &ids, CommentStatus::Accepted)
                .unwrap(),
            1
        );
        let stored = svc
            .comments()
            .get_comment("alice", "p1", &ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, CommentStatus::Accepted);
    }
}

//! Project store: resolves a project id to its document tree.
//!
//! Project sync and CRUD live outside this crate; tools only read through
//! the `ProjectStore` trait. `InMemoryProjectStore` backs tests and
//! embedders that keep projects in process.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::errors::DocumentError;
use super::types::Project;

/// Read access to synced projects, scoped by actor.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, actor_id: &str, project_id: &str)
        -> Result<Project, DocumentError>;
}

/// Projects held in memory, keyed by (actor, project id).
#[derive(Default)]
pub struct InMemoryProjectStore {
    projects: RwLock<HashMap<(String, String), Project>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a project for an actor.
    pub fn upsert(&self, actor_id: &str, project: Project) {
        let mut projects = self
            .projects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        projects.insert((actor_id.to_string(), project.id.clone()), project);
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get_project(
        &self,
        actor_id: &str,
        project_id: &str,
    ) -> Result<Project, DocumentError> {
        let projects = self
            .projects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        projects
            .get(&(actor_id.to_string(), project_id.to_string()))
            .cloned()
            .ok_or_else(|| DocumentError::ProjectNotFound {
                project_id: project_id.to_string(),
            })
    }
}

//! Task store: workspace/status/assignee queries and the readiness set.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use atelier_types::{Task, TaskStatus};

use crate::StoreResult;

/// In-memory task store.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a copy of a task by id.
    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Insert or replace a task.
    pub async fn save(&self, task: &Task) -> StoreResult<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    /// All tasks of a workspace, copied out.
    pub async fn list_by_workspace(&self, workspace_id: &str) -> Vec<Task> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    /// All tasks currently in `status`.
    pub async fn list_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    /// All tasks assigned to `agent_id`.
    pub async fn list_by_assignee(&self, agent_id: &str) -> Vec<Task> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.assigned_to.as_deref() == Some(agent_id))
            .cloned()
            .collect()
    }

    /// Tasks that are ready to run: `Pending` with every dependency
    /// `Completed`. A dependency that does not exist in the store counts as
    /// unmet.
    pub async fn find_ready(&self, workspace_id: &str) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        tasks
            .values()
            .filter(|t| t.workspace_id == workspace_id && t.status == TaskStatus::Pending)
            .filter(|t| {
                t.dependencies.iter().all(|dep| {
                    tasks
                        .get(dep)
                        .map(|d| d.status == TaskStatus::Completed)
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect()
    }

    /// Number of stored tasks.
    pub async fn count(&self) -> usize {
        self.tasks.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(title: &str, ws: &str) -> Task {
        Task::new(title, "do it", ws).unwrap()
    }

    #[tokio::test]
    async fn ready_requires_completed_dependencies() {
        let store = TaskStore::new();

        let mut dep = task("dep", "ws");
        dep.status = TaskStatus::Completed;
        store.save(&dep).await.unwrap();

        let mut blocked_dep = task("blocked-dep", "ws");
        blocked_dep.status = TaskStatus::InProgress;
        store.save(&blocked_dep).await.unwrap();

        let mut ready = task("ready", "ws");
        ready.dependencies.push(dep.id.clone());
        store.save(&ready).await.unwrap();

        let mut waiting = task("waiting", "ws");
        waiting.dependencies.push(blocked_dep.id.clone());
        store.save(&waiting).await.unwrap();

        let mut dangling = task("dangling", "ws");
        dangling.dependencies.push("no-such-task".to_string());
        store.save(&dangling).await.unwrap();

        let found = store.find_ready("ws").await;
        let titles: Vec<&str> = found.iter().map(|t| t.title.as_str()).collect();
        assert!(titles.contains(&"ready"));
        assert!(!titles.contains(&"waiting"));
        assert!(!titles.contains(&"dangling"));
        // Completed tasks are never ready again.
        assert!(!titles.contains(&"dep"));
    }

    #[tokio::test]
    async fn status_and_assignee_queries() {
        let store = TaskStore::new();
        let mut a = task("a", "ws");
        a.status = TaskStatus::ReviewRequired;
        a.assigned_to = Some("agent-1".to_string());
        store.save(&a).await.unwrap();

        let b = task("b", "ws");
        store.save(&b).await.unwrap();

        assert_eq!(store.list_by_status(TaskStatus::ReviewRequired).await.len(), 1);
        assert_eq!(store.list_by_assignee("agent-1").await.len(), 1);
        assert_eq!(store.list_by_assignee("agent-2").await.len(), 0);
        assert_eq!(store.list_by_workspace("ws").await.len(), 2);
    }
}

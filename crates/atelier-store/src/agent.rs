//! Agent store: id-keyed upserts plus workspace listing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use atelier_types::{Agent, AgentStatus};

use crate::{StoreError, StoreResult};

/// In-memory agent store.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct AgentStore {
    agents: Arc<RwLock<HashMap<String, Agent>>>,
}

impl AgentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a copy of an agent by id.
    pub async fn get(&self, id: &str) -> Option<Agent> {
        self.agents.read().await.get(id).cloned()
    }

    /// Insert or replace an agent.
    pub async fn save(&self, agent: &Agent) -> StoreResult<()> {
        self.agents
            .write()
            .await
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    /// Update an agent's status in place, bumping `updated_at`.
    ///
    /// Completed and Error are terminal; moving a terminal agent to any
    /// other status is refused. Returns the previous status so callers can
    /// decide whether a change event is warranted.
    pub async fn update_status(&self, id: &str, status: AgentStatus) -> StoreResult<AgentStatus> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(id).ok_or_else(|| StoreError::NotFound {
            kind: "agent",
            id: id.to_string(),
        })?;
        let previous = agent.status;
        if previous.is_terminal() && status != previous {
            return Err(StoreError::Validation(format!(
                "agent {id} is terminal ({previous:?}) and cannot become {status:?}"
            )));
        }
        agent.status = status;
        agent.updated_at = Utc::now();
        debug!(agent_id = id, ?previous, ?status, "agent status updated");
        Ok(previous)
    }

    /// All agents of a workspace, copied out.
    pub async fn list_by_workspace(&self, workspace_id: &str) -> Vec<Agent> {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    /// Number of stored agents.
    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_types::AgentRole;

    #[tokio::test]
    async fn save_and_get_round_trip() {
        let store = AgentStore::new();
        let agent = Agent::new("crafter-1", AgentRole::Implementor, "ws", None, None).unwrap();
        store.save(&agent).await.unwrap();

        let fetched = store.get(&agent.id).await.unwrap();
        assert_eq!(fetched, agent);
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn update_status_returns_previous() {
        let store = AgentStore::new();
        let agent = Agent::new("crafter-1", AgentRole::Implementor, "ws", None, None).unwrap();
        store.save(&agent).await.unwrap();

        let previous = store
            .update_status(&agent.id, AgentStatus::Active)
            .await
            .unwrap();
        assert_eq!(previous, AgentStatus::Pending);
        assert_eq!(store.get(&agent.id).await.unwrap().status, AgentStatus::Active);

        let err = store.update_status("missing", AgentStatus::Active).await;
        assert!(matches!(err, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn terminal_agents_stay_terminal() {
        let store = AgentStore::new();
        let agent = Agent::new("crafter-1", AgentRole::Implementor, "ws", None, None).unwrap();
        store.save(&agent).await.unwrap();
        store
            .update_status(&agent.id, AgentStatus::Completed)
            .await
            .unwrap();

        let err = store.update_status(&agent.id, AgentStatus::Active).await;
        assert!(matches!(err, Err(StoreError::Validation(_))));

        // Re-asserting the terminal status is a no-op, not an error.
        let previous = store
            .update_status(&agent.id, AgentStatus::Completed)
            .await
            .unwrap();
        assert_eq!(previous, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn list_filters_by_workspace() {
        let store = AgentStore::new();
        let a = Agent::new("a", AgentRole::Coordinator, "ws-1", None, None).unwrap();
        let b = Agent::new("b", AgentRole::Implementor, "ws-2", None, None).unwrap();
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        let listed = store.list_by_workspace("ws-1").await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);
    }

    #[tokio::test]
    async fn reads_are_copies() {
        let store = AgentStore::new();
        let agent = Agent::new("a", AgentRole::Implementor, "ws", None, None).unwrap();
        store.save(&agent).await.unwrap();

        let mut copy = store.get(&agent.id).await.unwrap();
        copy.name = "mutated".to_string();
        assert_eq!(store.get(&agent.id).await.unwrap().name, "a");
    }
}

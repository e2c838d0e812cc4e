//! The discriminated event union published on the orchestration bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentRole, AgentStatus, CompletionReport, TaskStatus};

/// Everything observable that happens to agents and tasks.
///
/// Every variant carries the workspace it happened in and a wall-clock
/// timestamp so subscribers can order replayed events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
#[non_exhaustive]
pub enum AgentEvent {
    /// A new agent was persisted.
    #[serde(rename_all = "camelCase")]
    AgentCreated {
        /// The new agent.
        agent_id: String,
        /// Its display name.
        agent_name: String,
        /// Its role.
        role: AgentRole,
        /// Owning workspace.
        workspace_id: String,
        /// Publication instant.
        timestamp: DateTime<Utc>,
    },
    /// An agent's status changed.
    #[serde(rename_all = "camelCase")]
    AgentStatusChanged {
        /// The affected agent.
        agent_id: String,
        /// Owning workspace.
        workspace_id: String,
        /// Status before the change.
        from: AgentStatus,
        /// Status after the change.
        to: AgentStatus,
        /// Publication instant.
        timestamp: DateTime<Utc>,
    },
    /// An agent reached its terminal `Completed` status.
    #[serde(rename_all = "camelCase")]
    AgentCompleted {
        /// The completed agent.
        agent_id: String,
        /// Owning workspace.
        workspace_id: String,
        /// The agent's completion report, when one was submitted.
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<CompletionReport>,
        /// Publication instant.
        timestamp: DateTime<Utc>,
    },
    /// A task was handed to an agent.
    #[serde(rename_all = "camelCase")]
    TaskDelegated {
        /// The delegated task.
        task_id: String,
        /// The assignee.
        agent_id: String,
        /// The agent that performed the delegation.
        caller_agent_id: String,
        /// Owning workspace.
        workspace_id: String,
        /// Publication instant.
        timestamp: DateTime<Utc>,
    },
    /// A task's status changed.
    #[serde(rename_all = "camelCase")]
    TaskStatusChanged {
        /// The affected task.
        task_id: String,
        /// Owning workspace.
        workspace_id: String,
        /// Status before the change.
        from: TaskStatus,
        /// Status after the change.
        to: TaskStatus,
        /// Publication instant.
        timestamp: DateTime<Utc>,
    },
    /// A message was appended to an agent's conversation by a peer.
    #[serde(rename_all = "camelCase")]
    MessageReceived {
        /// The recipient.
        agent_id: String,
        /// The sender.
        from_agent_id: String,
        /// Owning workspace.
        workspace_id: String,
        /// Publication instant.
        timestamp: DateTime<Utc>,
    },
}

impl AgentEvent {
    /// Stable camelCase discriminator, matching the serialized `type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::AgentCreated { .. } => "agentCreated",
            AgentEvent::AgentStatusChanged { .. } => "agentStatusChanged",
            AgentEvent::AgentCompleted { .. } => "agentCompleted",
            AgentEvent::TaskDelegated { .. } => "taskDelegated",
            AgentEvent::TaskStatusChanged { .. } => "taskStatusChanged",
            AgentEvent::MessageReceived { .. } => "messageReceived",
        }
    }

    /// Workspace the event happened in.
    pub fn workspace_id(&self) -> &str {
        match self {
            AgentEvent::AgentCreated { workspace_id, .. }
            | AgentEvent::AgentStatusChanged { workspace_id, .. }
            | AgentEvent::AgentCompleted { workspace_id, .. }
            | AgentEvent::TaskDelegated { workspace_id, .. }
            | AgentEvent::TaskStatusChanged { workspace_id, .. }
            | AgentEvent::MessageReceived { workspace_id, .. } => workspace_id,
        }
    }

    /// The agent the event is *about*, where one exists.
    ///
    /// Used by buffered subscriptions to honour `exclude_self`.
    pub fn subject_agent_id(&self) -> Option<&str> {
        match self {
            AgentEvent::AgentCreated { agent_id, .. }
            | AgentEvent::AgentStatusChanged { agent_id, .. }
            | AgentEvent::AgentCompleted { agent_id, .. }
            | AgentEvent::TaskDelegated { agent_id, .. }
            | AgentEvent::MessageReceived { agent_id, .. } => Some(agent_id),
            AgentEvent::TaskStatusChanged { .. } => None,
        }
    }

    /// Publication instant.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AgentEvent::AgentCreated { timestamp, .. }
            | AgentEvent::AgentStatusChanged { timestamp, .. }
            | AgentEvent::AgentCompleted { timestamp, .. }
            | AgentEvent::TaskDelegated { timestamp, .. }
            | AgentEvent::TaskStatusChanged { timestamp, .. }
            | AgentEvent::MessageReceived { timestamp, .. } => *timestamp,
        }
    }

    /// Whether the event is retained in the bus replay log.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            AgentEvent::AgentCreated { .. }
                | AgentEvent::AgentCompleted { .. }
                | AgentEvent::TaskDelegated { .. }
                | AgentEvent::AgentStatusChanged { .. }
                | AgentEvent::TaskStatusChanged { .. }
        )
    }
}

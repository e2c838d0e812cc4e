#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **atelier-tools** – The coordination tool surface of Atelier.
//!
//! Ten operations form the sole control surface agents use to affect one
//! another: discover peers, spawn children, delegate work, exchange
//! messages, wake task assignees, and report completion. Every operation
//! returns a uniform [`ToolResult`] whose JSON payload is suitable for
//! re-embedding into an agent conversation.
//!
//! The operations never hold references between entities; relationships are
//! expressed as ids and resolved through the stores on each call.

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};

use atelier_bus::EventBus;
use atelier_store::{AgentStore, ConversationFilter, ConversationStore, TaskStore};
use atelier_types::{
    Agent, AgentEvent, AgentRole, AgentStatus, CompletionReport, Message, MessageRole, ModelTier,
    TaskStatus, ToolResult, Verdict,
};

mod specialist;

pub use specialist::{build_delegation_prompt, SpecialistProfile};

/// Maximum characters of the last assistant response included in an agent
/// summary.
const SUMMARY_RESPONSE_LIMIT: usize = 1000;

/// Parameters accepted by [`CoordinationTools::wake_or_create_task_agent`].
#[derive(Debug, Clone)]
pub struct WakeOrCreateParams {
    /// Task whose assignee should be woken.
    pub task_id: String,
    /// Context appended as a `User` message.
    pub context_message: String,
    /// The agent performing the call.
    pub caller_agent_id: String,
    /// Workspace a fresh agent would be created in.
    pub workspace_id: String,
    /// Name for a fresh agent; derived from the task title when absent.
    pub agent_name: Option<String>,
    /// Tier for a fresh agent; the Implementor default when absent.
    pub model_tier: Option<ModelTier>,
}

/// The coordination tool surface over one session's stores and bus.
///
/// Cheap to clone; all clones share the same stores.
#[derive(Clone)]
pub struct CoordinationTools {
    agents: AgentStore,
    tasks: TaskStore,
    conversations: ConversationStore,
    bus: EventBus,
}

impl CoordinationTools {
    /// Bind the tool surface to a session's stores and bus.
    pub fn new(
        agents: AgentStore,
        tasks: TaskStore,
        conversations: ConversationStore,
        bus: EventBus,
    ) -> Self {
        Self {
            agents,
            tasks,
            conversations,
            bus,
        }
    }

    /// The agent store this surface operates on.
    pub fn agents(&self) -> &AgentStore {
        &self.agents
    }

    /// The task store this surface operates on.
    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    /// The conversation store this surface operates on.
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// The event bus this surface publishes to.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    //─────────────────────────────
    //  Discovery
    //─────────────────────────────

    /// Summaries of every agent in a workspace.
    pub async fn list_agents(&self, workspace_id: &str) -> ToolResult {
        let agents = self.agents.list_by_workspace(workspace_id).await;
        let summaries: Vec<serde_json::Value> = agents
            .iter()
            .map(|a| {
                json!({
                    "id": a.id,
                    "name": a.name,
                    "role": a.role,
                    "status": a.status,
                    "parentId": a.parent_id,
                })
            })
            .collect();
        ToolResult::ok(json!({ "agents": summaries, "count": summaries.len() }))
    }

    /// Messages from a peer's conversation according to the filter.
    pub async fn read_agent_conversation(
        &self,
        agent_id: &str,
        last_n: Option<usize>,
        start_turn: Option<u32>,
        end_turn: Option<u32>,
        include_tool_calls: bool,
    ) -> ToolResult {
        if self.agents.get(agent_id).await.is_none() {
            return ToolResult::fail(format!("agent not found: {agent_id}"));
        }
        let filter = ConversationFilter {
            last_n,
            start_turn,
            end_turn,
            include_tool_calls,
        };
        let messages = self.conversations.conversation_filtered(agent_id, &filter).await;
        match serde_json::to_value(&messages) {
            Ok(value) => ToolResult::ok(json!({ "agentId": agent_id, "messages": value })),
            Err(e) => ToolResult::fail(format!("failed to serialize conversation: {e}")),
        }
    }

    /// Id, name, role, status, message count, assigned tasks, timestamps,
    /// and metadata for one agent.
    pub async fn get_agent_status(&self, agent_id: &str) -> ToolResult {
        let Some(agent) = self.agents.get(agent_id).await else {
            return ToolResult::fail(format!("agent not found: {agent_id}"));
        };
        let message_count = self.conversations.count(agent_id).await;
        let assigned: Vec<String> = self
            .tasks
            .list_by_assignee(agent_id)
            .await
            .into_iter()
            .map(|t| t.id)
            .collect();
        ToolResult::ok(json!({
            "id": agent.id,
            "name": agent.name,
            "role": agent.role,
            "status": agent.status,
            "messageCount": message_count,
            "assignedTaskIds": assigned,
            "createdAt": agent.created_at,
            "updatedAt": agent.updated_at,
            "metadata": agent.metadata,
        }))
    }

    /// Human-readable synopsis of an agent: status, message count,
    /// tool-call counts by name, truncated last assistant response, and
    /// assigned tasks.
    pub async fn get_agent_summary(&self, agent_id: &str) -> ToolResult {
        let Some(agent) = self.agents.get(agent_id).await else {
            return ToolResult::fail(format!("agent not found: {agent_id}"));
        };
        let conversation = self.conversations.conversation(agent_id).await;

        let mut tool_calls = std::collections::BTreeMap::<String, usize>::new();
        for message in &conversation {
            if let Some(name) = &message.tool_name {
                *tool_calls.entry(name.clone()).or_default() += 1;
            }
        }

        let last_response = conversation
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| truncate_chars(&m.content, SUMMARY_RESPONSE_LIMIT));

        let tasks: Vec<serde_json::Value> = self
            .tasks
            .list_by_assignee(agent_id)
            .await
            .iter()
            .map(|t| json!({ "id": t.id, "title": t.title, "status": t.status }))
            .collect();

        ToolResult::ok(json!({
            "id": agent.id,
            "name": agent.name,
            "role": agent.role,
            "status": agent.status,
            "messageCount": conversation.len(),
            "toolCallCounts": tool_calls,
            "lastAssistantResponse": last_response,
            "assignedTasks": tasks,
        }))
    }

    //─────────────────────────────
    //  Spawning and delegation
    //─────────────────────────────

    /// Persist a new `Pending` agent and announce it.
    #[instrument(skip(self))]
    pub async fn create_agent(
        &self,
        name: &str,
        role: AgentRole,
        workspace_id: &str,
        parent_id: Option<String>,
        model_tier: Option<ModelTier>,
    ) -> ToolResult {
        if let Some(parent) = &parent_id {
            if self.agents.get(parent).await.is_none() {
                return ToolResult::fail(format!("parent agent not found: {parent}"));
            }
        }
        let agent = match Agent::new(name, role, workspace_id, parent_id, model_tier) {
            Ok(agent) => agent,
            Err(e) => return ToolResult::fail(e),
        };
        if let Err(e) = self.agents.save(&agent).await {
            return ToolResult::fail(e.to_string());
        }
        self.bus.publish(&AgentEvent::AgentCreated {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            role: agent.role,
            workspace_id: agent.workspace_id.clone(),
            timestamp: Utc::now(),
        });
        info!(agent_id = %agent.id, name = %agent.name, role = agent.role.as_str(), "agent created");
        ToolResult::ok(json!({
            "agentId": agent.id,
            "name": agent.name,
            "role": agent.role,
            "status": agent.status,
        }))
    }

    /// Hand a task to an agent: the task goes `InProgress`, the agent goes
    /// `Active`, and three events are published in order `TaskDelegated`,
    /// `TaskStatusChanged`, `AgentStatusChanged`.
    #[instrument(skip(self))]
    pub async fn delegate(&self, agent_id: &str, task_id: &str, caller_agent_id: &str) -> ToolResult {
        let Some(agent) = self.agents.get(agent_id).await else {
            return ToolResult::fail(format!("agent not found: {agent_id}"));
        };
        let Some(mut task) = self.tasks.get(task_id).await else {
            return ToolResult::fail(format!("task not found: {task_id}"));
        };

        let previous_task_status = task.status;
        task.assigned_to = Some(agent_id.to_string());
        task.status = TaskStatus::InProgress;
        task.updated_at = Utc::now();
        if let Err(e) = self.tasks.save(&task).await {
            return ToolResult::fail(e.to_string());
        }

        let previous_agent_status = match self.agents.update_status(agent_id, AgentStatus::Active).await
        {
            Ok(previous) => previous,
            Err(e) => return ToolResult::fail(e.to_string()),
        };

        let now = Utc::now();
        self.bus.publish(&AgentEvent::TaskDelegated {
            task_id: task.id.clone(),
            agent_id: agent_id.to_string(),
            caller_agent_id: caller_agent_id.to_string(),
            workspace_id: task.workspace_id.clone(),
            timestamp: now,
        });
        self.bus.publish(&AgentEvent::TaskStatusChanged {
            task_id: task.id.clone(),
            workspace_id: task.workspace_id.clone(),
            from: previous_task_status,
            to: TaskStatus::InProgress,
            timestamp: now,
        });
        self.bus.publish(&AgentEvent::AgentStatusChanged {
            agent_id: agent_id.to_string(),
            workspace_id: agent.workspace_id.clone(),
            from: previous_agent_status,
            to: AgentStatus::Active,
            timestamp: now,
        });

        info!(task_id, agent_id, caller_agent_id, "task delegated");
        ToolResult::ok(json!({
            "taskId": task.id,
            "agentId": agent_id,
            "taskStatus": task.status,
        }))
    }

    //─────────────────────────────
    //  Messaging
    //─────────────────────────────

    /// Append a `User`-role message to the recipient's conversation, tagged
    /// with the sender's identity.
    pub async fn message_agent(&self, from_agent_id: &str, to_agent_id: &str, message: &str) -> ToolResult {
        let Some(recipient) = self.agents.get(to_agent_id).await else {
            return ToolResult::fail(format!("agent not found: {to_agent_id}"));
        };
        let sender_name = self
            .agents
            .get(from_agent_id)
            .await
            .map(|a| a.name)
            .unwrap_or_else(|| from_agent_id.to_string());

        let content = format!("**Message from {sender_name} ({from_agent_id})**\n\n{message}");
        let message = match Message::new(to_agent_id, MessageRole::User, content) {
            Ok(message) => message,
            Err(e) => return ToolResult::fail(e),
        };
        if let Err(e) = self.conversations.append(&message).await {
            return ToolResult::fail(e.to_string());
        }

        self.bus.publish(&AgentEvent::MessageReceived {
            agent_id: to_agent_id.to_string(),
            from_agent_id: from_agent_id.to_string(),
            workspace_id: recipient.workspace_id.clone(),
            timestamp: Utc::now(),
        });
        ToolResult::ok(json!({ "delivered": true, "toAgentId": to_agent_id }))
    }

    /// Message the agent assigned to a task. Fails if the task is
    /// unassigned.
    pub async fn send_message_to_task_agent(
        &self,
        task_id: &str,
        message: &str,
        caller_agent_id: &str,
    ) -> ToolResult {
        let Some(task) = self.tasks.get(task_id).await else {
            return ToolResult::fail(format!("task not found: {task_id}"));
        };
        let Some(assignee) = task.assigned_to else {
            return ToolResult::fail(format!("task has no assigned agent: {task_id}"));
        };
        self.message_agent(caller_agent_id, &assignee, message).await
    }

    /// Wake the live assignee of a task with a context message, or create a
    /// fresh Implementor for it.
    ///
    /// Idempotent on a live assignee: consecutive calls each append one
    /// `User` message and never create a second agent.
    #[instrument(skip(self, params), fields(task_id = %params.task_id))]
    pub async fn wake_or_create_task_agent(&self, params: WakeOrCreateParams) -> ToolResult {
        let Some(task) = self.tasks.get(&params.task_id).await else {
            return ToolResult::fail(format!("task not found: {}", params.task_id));
        };

        // A live assignee only needs the context appended.
        if let Some(assignee_id) = &task.assigned_to {
            if let Some(assignee) = self.agents.get(assignee_id).await {
                if matches!(assignee.status, AgentStatus::Active | AgentStatus::Pending) {
                    let delivery = self
                        .message_agent(&params.caller_agent_id, assignee_id, &params.context_message)
                        .await;
                    if !delivery.success {
                        return delivery;
                    }
                    return ToolResult::ok(json!({
                        "action": "woke_existing",
                        "agentId": assignee_id,
                        "taskId": task.id,
                    }));
                }
            }
        }

        let name = params
            .agent_name
            .clone()
            .unwrap_or_else(|| implementor_name(&task.title));
        // The caller becomes the parent so the fresh agent can report back.
        let parent_id = self
            .agents
            .get(&params.caller_agent_id)
            .await
            .map(|caller| caller.id);
        let created = self
            .create_agent(
                &name,
                AgentRole::Implementor,
                &params.workspace_id,
                parent_id,
                params.model_tier,
            )
            .await;
        if !created.success {
            return created;
        }
        let agent_id = created
            .data
            .as_ref()
            .and_then(|d| d["agentId"].as_str())
            .unwrap_or_default()
            .to_string();

        let delegated = self
            .delegate(&agent_id, &params.task_id, &params.caller_agent_id)
            .await;
        if !delegated.success {
            return delegated;
        }

        // First message of the fresh conversation is the delegation context.
        let message = match Message::new(&agent_id, MessageRole::User, &params.context_message) {
            Ok(message) => message,
            Err(e) => return ToolResult::fail(e),
        };
        if let Err(e) = self.conversations.append(&message).await {
            return ToolResult::fail(e.to_string());
        }

        ToolResult::ok(json!({
            "action": "created_new",
            "agentId": agent_id,
            "taskId": params.task_id,
        }))
    }

    //─────────────────────────────
    //  Reporting
    //─────────────────────────────

    /// Deliver a completion report to the reporting agent's parent and
    /// apply the role-dependent task transition:
    ///
    /// | reporter | success | task becomes |
    /// |---|---|---|
    /// | Verifier | true | `Completed`, verdict `Approved` |
    /// | Verifier | false | `NeedsFix`, verdict `NotApproved` |
    /// | Implementor | true | `ReviewRequired` + summary |
    /// | Implementor | false | unchanged |
    ///
    /// The reporting agent always ends `Completed`. A `TaskStatusChanged`
    /// event fires only if the stored status actually changed.
    #[instrument(skip(self, report), fields(agent_id = %report.agent_id))]
    pub async fn report_to_parent(&self, report: CompletionReport) -> ToolResult {
        let Some(agent) = self.agents.get(&report.agent_id).await else {
            return ToolResult::fail(format!("agent not found: {}", report.agent_id));
        };
        let Some(parent_id) = agent.parent_id.clone() else {
            return ToolResult::fail(format!("agent has no parent: {}", report.agent_id));
        };
        if self.agents.get(&parent_id).await.is_none() {
            return ToolResult::fail(format!("parent agent not found: {parent_id}"));
        }

        // Structured completion message for the parent's conversation.
        let content = render_completion_message(&agent, &report);
        let message = match Message::new(&parent_id, MessageRole::User, content) {
            Ok(message) => message,
            Err(e) => return ToolResult::fail(e),
        };
        if let Err(e) = self.conversations.append(&message).await {
            return ToolResult::fail(e.to_string());
        }

        // Role-dependent task transition.
        let mut task_change: Option<(String, String, TaskStatus, TaskStatus)> = None;
        if let Some(task_id) = &report.task_id {
            if let Some(mut task) = self.tasks.get(task_id).await {
                let previous = task.status;
                match (agent.role, report.success) {
                    (AgentRole::Verifier, true) => {
                        task.status = TaskStatus::Completed;
                        task.verification_verdict = Some(Verdict::Approved);
                        task.verification_report = Some(report.summary.clone());
                    }
                    (AgentRole::Verifier, false) => {
                        task.status = TaskStatus::NeedsFix;
                        task.verification_verdict = Some(Verdict::NotApproved);
                        task.verification_report = Some(report.summary.clone());
                    }
                    (AgentRole::Implementor, true) => {
                        task.status = TaskStatus::ReviewRequired;
                        task.completion_summary = Some(report.summary.clone());
                    }
                    // A failing implementor leaves the decision to the
                    // parent; a coordinator report never moves tasks.
                    (AgentRole::Implementor, false) | (AgentRole::Coordinator, _) => {}
                }
                task.updated_at = Utc::now();
                if let Err(e) = self.tasks.save(&task).await {
                    return ToolResult::fail(e.to_string());
                }
                if task.status != previous {
                    task_change =
                        Some((task.id.clone(), task.workspace_id.clone(), previous, task.status));
                }
            } else {
                warn!(task_id = %task_id, "report references unknown task; skipping transition");
            }
        }

        let previous_agent_status =
            match self.agents.update_status(&report.agent_id, AgentStatus::Completed).await {
                Ok(previous) => previous,
                Err(e) => return ToolResult::fail(e.to_string()),
            };

        let now = Utc::now();
        self.bus.publish(&AgentEvent::AgentStatusChanged {
            agent_id: report.agent_id.clone(),
            workspace_id: agent.workspace_id.clone(),
            from: previous_agent_status,
            to: AgentStatus::Completed,
            timestamp: now,
        });
        self.bus.publish(&AgentEvent::AgentCompleted {
            agent_id: report.agent_id.clone(),
            workspace_id: agent.workspace_id.clone(),
            report: Some(report.clone()),
            timestamp: now,
        });
        if let Some((task_id, workspace_id, from, to)) = task_change {
            self.bus.publish(&AgentEvent::TaskStatusChanged {
                task_id,
                workspace_id,
                from,
                to,
                timestamp: now,
            });
        }

        info!(agent_id = %report.agent_id, success = report.success, "report delivered to parent");
        ToolResult::ok(json!({
            "reported": true,
            "parentId": parent_id,
            "agentStatus": AgentStatus::Completed,
        }))
    }
}

/// Truncate to at most `limit` characters, respecting char boundaries.
fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut truncated: String = text.chars().take(limit).collect();
        truncated.push('…');
        truncated
    }
}

/// Default display name for an implementor created for a task.
fn implementor_name(task_title: &str) -> String {
    let slug: String = task_title
        .chars()
        .take(30)
        .map(|c| if c.is_whitespace() { '-' } else { c.to_ascii_lowercase() })
        .collect();
    format!("crafter-{slug}")
}

/// Render the structured completion message appended to the parent.
fn render_completion_message(agent: &Agent, report: &CompletionReport) -> String {
    let mut content = format!(
        "## Completion Report\n\n**Agent:** {} ({})\n**Success:** {}\n**Summary:** {}\n",
        agent.name, agent.id, report.success, report.summary
    );
    if let Some(task_id) = &report.task_id {
        content.push_str(&format!("**Task:** {task_id}\n"));
    }
    if let Some(files) = &report.files_modified {
        content.push_str("**Files modified:**\n");
        for file in files {
            content.push_str(&format!("- {file}\n"));
        }
    }
    if let Some(results) = &report.verification_results {
        content.push_str("**Verification:**\n");
        for (command, outcome) in results {
            content.push_str(&format!("- `{command}` → {outcome}\n"));
        }
    }
    content
}

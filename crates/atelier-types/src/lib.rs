#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **atelier-types** – Shared primitive data structures for Atelier.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It intentionally makes no assumptions about I/O, transport, or storage.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod event;
pub use event::AgentEvent;

//─────────────────────────────
//  Validation limits
//─────────────────────────────

/// Maximum allowed length for agent names.
pub const MAX_AGENT_NAME_LEN: usize = 256;

/// Maximum allowed length for task titles.
pub const MAX_TASK_TITLE_LEN: usize = 512;

/// Maximum allowed length for a single conversation message to prevent
/// unbounded memory growth from a misbehaving agent.
pub const MAX_MESSAGE_CONTENT_LEN: usize = 1_048_576; // 1MB

//─────────────────────────────
//  Roles and tiers
//─────────────────────────────

/// The three cooperating roles of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Plans work and delegates it.
    Coordinator,
    /// Performs the actual changes.
    Implementor,
    /// Approves or rejects completed work.
    Verifier,
}

impl AgentRole {
    /// Model tier used for this role when the caller does not override it.
    pub fn default_tier(&self) -> ModelTier {
        match self {
            AgentRole::Coordinator | AgentRole::Verifier => ModelTier::Smart,
            AgentRole::Implementor => ModelTier::Fast,
        }
    }

    /// Stable lowercase name, used in ids and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Coordinator => "coordinator",
            AgentRole::Implementor => "implementor",
            AgentRole::Verifier => "verifier",
        }
    }
}

/// Model capability tier backing an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// High-capability, slower model.
    Smart,
    /// Cheaper, faster model.
    Fast,
}

//─────────────────────────────
//  Statuses and verdicts
//─────────────────────────────

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Created but not yet given work.
    Pending,
    /// Actively working on a task.
    Active,
    /// Finished; terminal.
    Completed,
    /// Failed; terminal.
    Error,
    /// Cancelled by the host.
    Cancelled,
}

impl AgentStatus {
    /// Completed and Error agents never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Error)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Planned, not yet assigned.
    Pending,
    /// Assigned to an agent.
    InProgress,
    /// Implementor finished; awaiting the verifier.
    ReviewRequired,
    /// Approved by the verifier.
    Completed,
    /// Rejected by the verifier; will be re-run.
    NeedsFix,
    /// Cannot proceed (e.g. its agent failed to spawn).
    Blocked,
    /// Cancelled by the host.
    Cancelled,
}

/// The verifier's judgement over one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    /// Every acceptance criterion verified.
    Approved,
    /// At least one criterion failed.
    NotApproved,
    /// Verification could not run.
    Blocked,
}

/// Role of one conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Injected instructions.
    System,
    /// Input addressed to the agent.
    User,
    /// The agent's own output.
    Assistant,
    /// A tool invocation or its result.
    Tool,
}

//─────────────────────────────
//  Entities
//─────────────────────────────

/// A role-bearing participant in one orchestration session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Opaque unique id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Role the agent plays.
    pub role: AgentRole,
    /// Model tier backing the agent.
    pub model_tier: ModelTier,
    /// Workspace the agent belongs to.
    pub workspace_id: String,
    /// Spawning agent, if any. Stored as an id so the relationship graph
    /// stays acyclic; resolve through the agent store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata attached by tools or providers.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Agent {
    /// Create a new `Pending` agent with a fresh id.
    ///
    /// Validates the name against [`MAX_AGENT_NAME_LEN`].
    pub fn new(
        name: impl Into<String>,
        role: AgentRole,
        workspace_id: impl Into<String>,
        parent_id: Option<String>,
        model_tier: Option<ModelTier>,
    ) -> Result<Self, String> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("agent name cannot be empty".to_string());
        }
        if name.len() > MAX_AGENT_NAME_LEN {
            return Err(format!(
                "agent name too long: {} > {}",
                name.len(),
                MAX_AGENT_NAME_LEN
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            model_tier: model_tier.unwrap_or_else(|| role.default_tier()),
            role,
            workspace_id: workspace_id.into(),
            parent_id,
            status: AgentStatus::Pending,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        })
    }
}

/// A planned unit of work with acceptance criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Opaque unique id.
    pub id: String,
    /// Short title, the `# ` heading of the task block.
    pub title: String,
    /// What the task must achieve.
    pub objective: String,
    /// Optional boundaries of the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Ordered acceptance criteria; every one must be verified.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Commands that demonstrate the criteria hold.
    #[serde(default)]
    pub verification_commands: Vec<String>,
    /// Assigned agent id, if delegated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Task ids that must be `Completed` before this task is ready.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Tasks sharing a group may run concurrently.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    /// Workspace the task belongs to.
    pub workspace_id: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
    /// Implementor's summary, set when the task reaches review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_summary: Option<String>,
    /// Verifier's free-form report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_report: Option<String>,
    /// Verifier's verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_verdict: Option<Verdict>,
}

impl Task {
    /// Create a new `Pending` task with a fresh id.
    ///
    /// Validates the title against [`MAX_TASK_TITLE_LEN`].
    pub fn new(
        title: impl Into<String>,
        objective: impl Into<String>,
        workspace_id: impl Into<String>,
    ) -> Result<Self, String> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err("task title cannot be empty".to_string());
        }
        if title.len() > MAX_TASK_TITLE_LEN {
            return Err(format!(
                "task title too long: {} > {}",
                title.len(),
                MAX_TASK_TITLE_LEN
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            objective: objective.into(),
            scope: None,
            acceptance_criteria: Vec::new(),
            verification_commands: Vec::new(),
            assigned_to: None,
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            parallel_group: None,
            workspace_id: workspace_id.into(),
            created_at: now,
            updated_at: now,
            completion_summary: None,
            verification_report: None,
            verification_verdict: None,
        })
    }
}

/// One turn in an agent's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Opaque unique id.
    pub id: String,
    /// Owning agent's id.
    pub agent_id: String,
    /// Who produced the message.
    pub role: MessageRole,
    /// Message body.
    pub content: String,
    /// Wall-clock instant; conversations are ordered by timestamp then
    /// insertion order.
    pub timestamp: DateTime<Utc>,
    /// Tool name, for `Tool` messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool arguments, for `Tool` messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
    /// Turn counter within the conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u32>,
}

impl Message {
    /// Create a message for `agent_id`'s conversation.
    ///
    /// Content beyond [`MAX_MESSAGE_CONTENT_LEN`] is rejected.
    pub fn new(
        agent_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Result<Self, String> {
        let content = content.into();
        if content.len() > MAX_MESSAGE_CONTENT_LEN {
            return Err(format!(
                "message content too long: {} > {}",
                content.len(),
                MAX_MESSAGE_CONTENT_LEN
            ));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            role,
            content,
            timestamp: Utc::now(),
            tool_name: None,
            tool_args: None,
            turn: None,
        })
    }

    /// Attach tool metadata to the message.
    pub fn with_tool(mut self, name: impl Into<String>, args: serde_json::Value) -> Self {
        self.tool_name = Some(name.into());
        self.tool_args = Some(args);
        self
    }
}

//─────────────────────────────
//  Reports and tool results
//─────────────────────────────

/// Structured completion report an agent submits to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    /// Reporting agent.
    pub agent_id: String,
    /// Task the report refers to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Short human-readable summary.
    pub summary: String,
    /// Files touched by the work.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_modified: Option<Vec<String>>,
    /// Verification command → outcome. Ordered so reports render
    /// deterministically.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_results: Option<BTreeMap<String, String>>,
    /// Whether the agent considers the work done.
    pub success: bool,
}

/// Uniform result of every coordination tool call, suitable for
/// re-embedding into an agent conversation as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Successful result carrying `data`.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed result carrying a message.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

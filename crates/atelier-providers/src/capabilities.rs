//! Capability records and per-role requirements.

use serde::{Deserialize, Serialize};

use atelier_types::AgentRole;

/// What one provider declares it can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Provider name, used in routing errors and logs.
    pub name: String,
    /// Chunks are delivered while the agent runs.
    pub supports_streaming: bool,
    /// In-flight turns can be cancelled.
    pub supports_interrupt: bool,
    /// Health can be probed per agent.
    pub supports_health_check: bool,
    /// The agent can edit files.
    pub supports_file_editing: bool,
    /// The agent can run terminal commands.
    pub supports_terminal: bool,
    /// The agent can call tools.
    pub supports_tool_calling: bool,
    /// Upper bound on concurrently running agents.
    pub max_concurrent_agents: usize,
    /// Selection priority; higher wins, registration order breaks ties.
    pub priority: i32,
}

/// One requirement a role places on its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// The role calls coordination tools.
    ToolCalling,
    /// The role edits files.
    FileEditing,
    /// The role runs commands.
    Terminal,
}

impl Requirement {
    /// Label used in routing errors, e.g. `needsTerminal`.
    pub fn label(&self) -> &'static str {
        match self {
            Requirement::ToolCalling => "needsToolCalling",
            Requirement::FileEditing => "needsFileEditing",
            Requirement::Terminal => "needsTerminal",
        }
    }

    /// Whether `capabilities` satisfies this requirement.
    pub fn satisfied_by(&self, capabilities: &ProviderCapabilities) -> bool {
        match self {
            Requirement::ToolCalling => capabilities.supports_tool_calling,
            Requirement::FileEditing => capabilities.supports_file_editing,
            Requirement::Terminal => capabilities.supports_terminal,
        }
    }
}

/// The requirements a role places on its provider: planners need tool
/// calling, implementors need file editing and a terminal, verifiers need
/// a terminal.
pub fn requirements_for(role: AgentRole) -> &'static [Requirement] {
    match role {
        AgentRole::Coordinator => &[Requirement::ToolCalling],
        AgentRole::Implementor => &[Requirement::FileEditing, Requirement::Terminal],
        AgentRole::Verifier => &[Requirement::Terminal],
    }
}

//! The uniform, role-dependent tool surface exposed to spawned agents.
//!
//! Coordination tools are implemented in-core; host tools (file system,
//! formatter, diff viewer, diagnostics) are only described by the
//! [`HostTools`] contract and provided by the embedding environment.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use atelier_tools::{CoordinationTools, WakeOrCreateParams};
use atelier_types::{AgentRole, CompletionReport, ModelTier, ToolResult};

/// The host-provided tool surface. Implementations live outside the core;
/// the orchestrator only routes calls through this contract.
#[async_trait]
pub trait HostTools: Send + Sync {
    /// Read a file.
    async fn read_file(&self, path: &str) -> ToolResult;
    /// Write a file.
    async fn write_file(&self, path: &str, content: &str) -> ToolResult;
    /// List files under a path.
    async fn list_files(&self, path: &str) -> ToolResult;
    /// Reformat a file in place.
    async fn reformat_file(&self, path: &str) -> ToolResult;
    /// Open a file in the host editor.
    async fn open_file(&self, path: &str) -> ToolResult;
    /// Open several files in the host editor.
    async fn open_files(&self, paths: &[String]) -> ToolResult;
    /// Close an editor tab.
    async fn close_tab(&self, path: &str) -> ToolResult;
    /// List open editor tabs.
    async fn list_open_files(&self) -> ToolResult;
    /// Open an accept/reject diff.
    async fn open_diff(&self, path: &str, proposed: &str) -> ToolResult;
    /// Fetch diagnostics, optionally filtered by severity.
    async fn get_diagnostics(&self, severity: Option<&str>) -> ToolResult;
}

/// One tool offered to an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolBinding {
    /// Tool name as exposed to agents.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
}

const COORDINATION_BINDINGS: &[ToolBinding] = &[
    ToolBinding {
        name: "list_agents",
        description: "List every agent in the workspace",
    },
    ToolBinding {
        name: "read_agent_conversation",
        description: "Read a peer agent's conversation",
    },
    ToolBinding {
        name: "create_agent",
        description: "Create a new agent",
    },
    ToolBinding {
        name: "delegate",
        description: "Assign a task to an agent",
    },
    ToolBinding {
        name: "message_agent",
        description: "Send a message to another agent",
    },
    ToolBinding {
        name: "report_to_parent",
        description: "Report completion to your parent",
    },
    ToolBinding {
        name: "wake_or_create_task_agent",
        description: "Wake a task's assignee or create one",
    },
    ToolBinding {
        name: "send_message_to_task_agent",
        description: "Message the agent assigned to a task",
    },
    ToolBinding {
        name: "get_agent_status",
        description: "Fetch an agent's status",
    },
    ToolBinding {
        name: "get_agent_summary",
        description: "Fetch a human-readable agent synopsis",
    },
];

const HOST_BINDINGS: &[ToolBinding] = &[
    ToolBinding {
        name: "read_file",
        description: "Read a file from the workspace",
    },
    ToolBinding {
        name: "write_file",
        description: "Write a file in the workspace",
    },
    ToolBinding {
        name: "list_files",
        description: "List workspace files",
    },
    ToolBinding {
        name: "reformat_file",
        description: "Reformat a file",
    },
    ToolBinding {
        name: "open_file",
        description: "Open a file in the editor",
    },
    ToolBinding {
        name: "open_files",
        description: "Open several files in the editor",
    },
    ToolBinding {
        name: "close_tab",
        description: "Close an editor tab",
    },
    ToolBinding {
        name: "list_open_files",
        description: "List open editor tabs",
    },
    ToolBinding {
        name: "open_diff",
        description: "Open an accept/reject diff",
    },
    ToolBinding {
        name: "get_diagnostics",
        description: "Fetch diagnostics",
    },
];

/// Binds coordination and host tools into one dispatchable surface.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: CoordinationTools,
    host: Option<Arc<dyn HostTools>>,
}

impl ToolRegistry {
    /// Build the registry; `host` is absent when the embedding environment
    /// provides no editor surface.
    pub fn new(tools: CoordinationTools, host: Option<Arc<dyn HostTools>>) -> Self {
        Self { tools, host }
    }

    /// The tools visible to a role. Every role coordinates; only
    /// Implementors also get the host surface (when one exists).
    pub fn bindings_for(&self, role: AgentRole) -> Vec<ToolBinding> {
        let mut bindings: Vec<ToolBinding> = COORDINATION_BINDINGS.to_vec();
        if role == AgentRole::Implementor && self.host.is_some() {
            bindings.extend(HOST_BINDINGS.iter().cloned());
        }
        bindings
    }

    /// Dispatch a coordination tool call by name with JSON arguments.
    /// Unknown names and malformed arguments come back as failed results,
    /// never as errors.
    pub async fn invoke(&self, name: &str, args: &Value) -> ToolResult {
        self.dispatch(name, args)
            .await
            .unwrap_or_else(ToolResult::fail)
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Result<ToolResult, String> {
        let str_arg = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
        let require = |key: &str| {
            str_arg(key).ok_or_else(|| format!("missing required argument: {key}"))
        };

        match name {
            "list_agents" => Ok(self.tools.list_agents(&require("workspaceId")?).await),
            "read_agent_conversation" => Ok(self
                .tools
                .read_agent_conversation(
                    &require("agentId")?,
                    args.get("lastN").and_then(Value::as_u64).map(|n| n as usize),
                    args.get("startTurn").and_then(Value::as_u64).map(|n| n as u32),
                    args.get("endTurn").and_then(Value::as_u64).map(|n| n as u32),
                    args.get("includeToolCalls")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                )
                .await),
            "create_agent" => {
                let role = parse_role(&require("role")?)?;
                Ok(self
                    .tools
                    .create_agent(
                        &require("name")?,
                        role,
                        &require("workspaceId")?,
                        str_arg("parentId"),
                        parse_tier(args.get("modelTier")),
                    )
                    .await)
            }
            "delegate" => Ok(self
                .tools
                .delegate(
                    &require("agentId")?,
                    &require("taskId")?,
                    &require("callerAgentId")?,
                )
                .await),
            "message_agent" => Ok(self
                .tools
                .message_agent(
                    &require("fromAgentId")?,
                    &require("toAgentId")?,
                    &require("message")?,
                )
                .await),
            "report_to_parent" => {
                let report: CompletionReport =
                    serde_json::from_value(args.get("report").cloned().unwrap_or_default())
                        .map_err(|e| format!("malformed report: {e}"))?;
                Ok(self.tools.report_to_parent(report).await)
            }
            "wake_or_create_task_agent" => Ok(self
                .tools
                .wake_or_create_task_agent(WakeOrCreateParams {
                    task_id: require("taskId")?,
                    context_message: require("contextMessage")?,
                    caller_agent_id: require("callerAgentId")?,
                    workspace_id: require("workspaceId")?,
                    agent_name: str_arg("agentName"),
                    model_tier: parse_tier(args.get("modelTier")),
                })
                .await),
            "send_message_to_task_agent" => Ok(self
                .tools
                .send_message_to_task_agent(
                    &require("taskId")?,
                    &require("message")?,
                    &require("callerAgentId")?,
                )
                .await),
            "get_agent_status" => Ok(self.tools.get_agent_status(&require("agentId")?).await),
            "get_agent_summary" => Ok(self.tools.get_agent_summary(&require("agentId")?).await),
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

fn parse_role(role: &str) -> Result<AgentRole, String> {
    match role.to_lowercase().as_str() {
        "coordinator" => Ok(AgentRole::Coordinator),
        "implementor" => Ok(AgentRole::Implementor),
        "verifier" => Ok(AgentRole::Verifier),
        other => Err(format!("unknown role: {other}")),
    }
}

fn parse_tier(tier: Option<&Value>) -> Option<ModelTier> {
    match tier.and_then(Value::as_str) {
        Some("smart") => Some(ModelTier::Smart),
        Some("fast") => Some(ModelTier::Fast),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_bus::EventBus;
    use atelier_store::{AgentStore, ConversationStore, TaskStore};
    use serde_json::json;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(
            CoordinationTools::new(
                AgentStore::new(),
                TaskStore::new(),
                ConversationStore::new(),
                EventBus::new(),
            ),
            None,
        )
    }

    #[test]
    fn every_role_gets_the_coordination_surface() {
        let registry = registry();
        for role in [AgentRole::Coordinator, AgentRole::Implementor, AgentRole::Verifier] {
            let names: Vec<&str> = registry.bindings_for(role).iter().map(|b| b.name).collect();
            assert_eq!(names.len(), 10, "role {role:?}");
            assert!(names.contains(&"wake_or_create_task_agent"));
        }
    }

    #[tokio::test]
    async fn invoke_dispatches_and_validates() {
        let registry = registry();

        let created = registry
            .invoke(
                "create_agent",
                &json!({"name": "crafter", "role": "implementor", "workspaceId": "ws"}),
            )
            .await;
        assert!(created.success);

        let listed = registry
            .invoke("list_agents", &json!({"workspaceId": "ws"}))
            .await;
        assert_eq!(listed.data.unwrap()["count"], 1);

        let missing = registry.invoke("delegate", &json!({"agentId": "a"})).await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("taskId"));

        let unknown = registry.invoke("no_such_tool", &json!({})).await;
        assert!(!unknown.success);
    }
}

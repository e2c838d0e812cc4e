//! Single-agent workspace provider over the same child transport.

use async_trait::async_trait;

use crate::{
    AgentProvider, AgentRequest, AgentResponse, ChunkHandler, ProcessAgentProvider,
    ProcessProviderConfig, ProviderCapabilities, ProviderResult,
};

/// The fixed child key the workspace provider multiplexes every role onto.
const WORKSPACE_AGENT_KEY: &str = "workspace";

/// Same transport as [`ProcessAgentProvider`], but a single child serves
/// the whole workspace and the tool registry offered to it is richer:
/// file read/write/list plus the ten coordination tools.
pub struct WorkspaceAgentProvider {
    inner: ProcessAgentProvider,
    name: String,
    priority: i32,
    tools: Vec<String>,
}

impl WorkspaceAgentProvider {
    /// Create the provider around one agent command.
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>, priority: i32) -> Self {
        let name = name.into();
        Self {
            inner: ProcessAgentProvider::new(ProcessProviderConfig {
                name: name.clone(),
                command: command.into(),
                args,
                priority,
                max_concurrent_agents: 1,
            }),
            name,
            priority,
            tools: vec![
                "read_file".to_string(),
                "write_file".to_string(),
                "list_files".to_string(),
                "list_agents".to_string(),
                "read_agent_conversation".to_string(),
                "create_agent".to_string(),
                "delegate".to_string(),
                "message_agent".to_string(),
                "report_to_parent".to_string(),
                "wake_or_create_task_agent".to_string(),
                "send_message_to_task_agent".to_string(),
                "get_agent_status".to_string(),
                "get_agent_summary".to_string(),
            ],
        }
    }

    /// Names of the tools this provider exposes to its child.
    pub fn tool_registry(&self) -> &[String] {
        &self.tools
    }
}

#[async_trait]
impl AgentProvider for WorkspaceAgentProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            name: self.name.clone(),
            supports_streaming: true,
            supports_interrupt: true,
            supports_health_check: true,
            supports_file_editing: true,
            supports_terminal: true,
            supports_tool_calling: true,
            max_concurrent_agents: 1,
            priority: self.priority,
        }
    }

    async fn run_streaming(
        &self,
        mut request: AgentRequest,
        on_chunk: ChunkHandler,
    ) -> ProviderResult<AgentResponse> {
        // Every role shares the one workspace child.
        request.agent_id = WORKSPACE_AGENT_KEY.to_string();
        self.inner.run_streaming(request, on_chunk).await
    }

    async fn is_healthy(&self, _agent_id: &str) -> bool {
        self.inner.is_healthy(WORKSPACE_AGENT_KEY).await
    }

    async fn interrupt(&self, _agent_id: &str) {
        self.inner.interrupt(WORKSPACE_AGENT_KEY).await;
    }

    async fn cleanup(&self, _agent_id: &str) {
        self.inner.cleanup(WORKSPACE_AGENT_KEY).await;
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

//! The provider operation surface.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use atelier_types::{AgentRole, CompletionReport};

use crate::{ProviderCapabilities, ProviderResult, StreamChunk};

/// Callback receiving stream chunks as they arrive. Consumers should
/// return promptly; a blocked consumer stalls the transport.
pub type ChunkHandler = Arc<dyn Fn(StreamChunk) + Send + Sync>;

/// One invocation of an agent through a provider.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Agent the run belongs to; process-backed providers key children by
    /// this id.
    pub agent_id: String,
    /// Role the agent plays; decides requirements and the child's mode.
    pub role: AgentRole,
    /// Owning workspace.
    pub workspace_id: String,
    /// The prompt for this turn.
    pub prompt: String,
    /// Working directory for the agent.
    pub cwd: String,
    /// Cancellation propagated to the in-flight request.
    pub cancel: CancellationToken,
}

impl AgentRequest {
    /// Convenience constructor with a fresh cancellation token.
    pub fn new(
        agent_id: impl Into<String>,
        role: AgentRole,
        workspace_id: impl Into<String>,
        prompt: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            workspace_id: workspace_id.into(),
            prompt: prompt.into(),
            cwd: cwd.into(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Final outcome of one agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    /// Accumulated visible reply text.
    pub text: String,
    /// Structured completion report, when the agent produced one.
    pub report: Option<CompletionReport>,
    /// Stop reason reported by the agent.
    pub stop_reason: Option<String>,
}

/// An executor that runs agents for roles and declares its capabilities.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// The provider's capability record.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Run an agent to completion, delivering chunks to `on_chunk`.
    async fn run_streaming(
        &self,
        request: AgentRequest,
        on_chunk: ChunkHandler,
    ) -> ProviderResult<AgentResponse>;

    /// Run an agent to completion without streaming.
    async fn run(&self, request: AgentRequest) -> ProviderResult<AgentResponse> {
        self.run_streaming(request, Arc::new(|_| {})).await
    }

    /// Whether the executor backing `agent_id` is healthy. Providers
    /// without per-agent state report overall health.
    async fn is_healthy(&self, agent_id: &str) -> bool;

    /// Best-effort cancellation of `agent_id`'s in-flight turn. Returns
    /// immediately; a no-op when nothing is running.
    async fn interrupt(&self, agent_id: &str);

    /// Release resources held for `agent_id`.
    async fn cleanup(&self, agent_id: &str);

    /// Release everything; the provider will not be used again.
    async fn shutdown(&self);
}

impl std::fmt::Debug for dyn AgentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn AgentProvider")
            .field("name", &self.capabilities().name)
            .finish()
    }
}

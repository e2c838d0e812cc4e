//! In-process provider that plays configured turns.
//!
//! This is the stubbed executor used by tests and offline runs: each role
//! has a queue of turns, and every invocation pops the next one. When a
//! role's queue is empty the provider echoes the prompt back.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use atelier_types::{AgentRole, CompletionReport};

use crate::{
    AgentProvider, AgentRequest, AgentResponse, ChunkHandler, ProviderCapabilities, ProviderError,
    ProviderResult, StreamChunk,
};

/// One scripted turn.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    /// Text streamed and returned.
    pub text: String,
    /// Completion report streamed and returned, when set.
    pub report: Option<CompletionReport>,
}

impl ScriptedTurn {
    /// A plain text turn.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            report: None,
        }
    }

    /// A turn that also submits a completion report.
    pub fn with_report(text: impl Into<String>, report: CompletionReport) -> Self {
        Self {
            text: text.into(),
            report: Some(report),
        }
    }
}

/// A record of one invocation, for assertions.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    /// Role the run was for.
    pub role: AgentRole,
    /// Agent that ran.
    pub agent_id: String,
    /// Prompt that was sent.
    pub prompt: String,
}

/// The scripted in-process provider.
pub struct ScriptedProvider {
    capabilities: ProviderCapabilities,
    turns: Mutex<HashMap<AgentRole, VecDeque<ScriptedTurn>>>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedProvider {
    /// Create a provider with the given capability record.
    pub fn new(capabilities: ProviderCapabilities) -> Self {
        Self {
            capabilities,
            turns: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A provider that satisfies every role's requirements.
    pub fn with_full_capabilities(name: impl Into<String>) -> Self {
        Self::new(ProviderCapabilities {
            name: name.into(),
            supports_streaming: true,
            supports_interrupt: true,
            supports_health_check: true,
            supports_file_editing: true,
            supports_terminal: true,
            supports_tool_calling: true,
            max_concurrent_agents: 4,
            priority: 0,
        })
    }

    /// Queue the next turn for a role.
    pub fn push_turn(&self, role: AgentRole, turn: ScriptedTurn) {
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(role)
            .or_default()
            .push_back(turn);
    }

    /// Number of invocations recorded for a role.
    pub fn call_count(&self, role: AgentRole) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.role == role)
            .count()
    }

    /// Every recorded invocation, in order.
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AgentProvider for ScriptedProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn run_streaming(
        &self,
        request: AgentRequest,
        on_chunk: ChunkHandler,
    ) -> ProviderResult<AgentResponse> {
        if request.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ScriptedCall {
                role: request.role,
                agent_id: request.agent_id.clone(),
                prompt: request.prompt.clone(),
            });

        let turn = self
            .turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&request.role)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| ScriptedTurn::text(request.prompt.clone()));

        debug!(role = request.role.as_str(), agent_id = %request.agent_id, "scripted turn");

        on_chunk(StreamChunk::Text {
            text: turn.text.clone(),
        });
        if let Some(report) = &turn.report {
            on_chunk(StreamChunk::CompletionReport {
                report: report.clone(),
            });
        }
        on_chunk(StreamChunk::Completed {
            stop_reason: Some("end_turn".to_string()),
        });

        Ok(AgentResponse {
            text: turn.text,
            report: turn.report,
            stop_reason: Some("end_turn".to_string()),
        })
    }

    async fn is_healthy(&self, _agent_id: &str) -> bool {
        true
    }

    async fn interrupt(&self, _agent_id: &str) {}

    async fn cleanup(&self, _agent_id: &str) {}

    async fn shutdown(&self) {}
}

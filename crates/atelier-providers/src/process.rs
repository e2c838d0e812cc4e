//! Provider backed by supervised child processes, one per agent id.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use atelier_agent_runtime::protocol::SessionUpdateParams;
use atelier_agent_runtime::{AgentProcess, HostResponder, SpawnConfig, SupervisorError};
use atelier_types::AgentRole;

use crate::{
    translate_update, AgentProvider, AgentRequest, AgentResponse, ChunkHandler,
    ProviderCapabilities, ProviderError, ProviderResult, StreamChunk,
};

/// How the provider launches its children.
#[derive(Debug, Clone)]
pub struct ProcessProviderConfig {
    /// Provider name used in routing and logs.
    pub name: String,
    /// Agent executable.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Selection priority.
    pub priority: i32,
    /// Concurrency bound advertised to the pipeline.
    pub max_concurrent_agents: usize,
}

/// The per-turn chunk sink a child's notification loop forwards into.
type Sink = Arc<StdMutex<Option<ChunkHandler>>>;

struct ChildEntry {
    process: Arc<AgentProcess>,
    session_id: String,
    sink: Sink,
    transcript: Arc<StdMutex<String>>,
}

/// One supervised child per agent id, speaking the line-delimited JSON-RPC
/// dialect. The child's mode follows the role: read-only planning for
/// Coordinator and Verifier, full build for Implementor.
pub struct ProcessAgentProvider {
    config: ProcessProviderConfig,
    children: DashMap<String, Arc<ChildEntry>>,
}

impl ProcessAgentProvider {
    /// Create the provider.
    pub fn new(config: ProcessProviderConfig) -> Self {
        Self {
            config,
            children: DashMap::new(),
        }
    }

    /// Session mode for a role.
    fn mode_for(role: AgentRole) -> &'static str {
        match role {
            AgentRole::Coordinator | AgentRole::Verifier => "plan",
            AgentRole::Implementor => "build",
        }
    }

    async fn ensure_child(&self, request: &AgentRequest) -> ProviderResult<Arc<ChildEntry>> {
        if let Some(entry) = self.children.get(&request.agent_id) {
            return Ok(Arc::clone(entry.value()));
        }

        info!(agent_id = %request.agent_id, command = %self.config.command, "spawning agent child");
        let sink: Sink = Arc::new(StdMutex::new(None));
        let transcript = Arc::new(StdMutex::new(String::new()));

        let notification_sink = Arc::clone(&sink);
        let notification_transcript = Arc::clone(&transcript);
        let process = AgentProcess::spawn(
            SpawnConfig {
                command: self.config.command.clone(),
                args: self.config.args.clone(),
                cwd: Some(request.cwd.clone().into()),
            },
            HostResponder::new(),
            Arc::new(move |method: String, params: Value| {
                if method != "session/update" {
                    debug!(method = %method, "non-update notification ignored");
                    return;
                }
                let update = match serde_json::from_value::<SessionUpdateParams>(params) {
                    Ok(parsed) => parsed.update,
                    Err(e) => {
                        warn!(error = %e, "unparseable session update dropped");
                        return;
                    }
                };
                let Some(chunk) = translate_update(update) else {
                    return;
                };
                if let StreamChunk::Text { text } = &chunk {
                    notification_transcript
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push_str(text);
                }
                let handler = notification_sink
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                if let Some(handler) = handler {
                    handler(chunk);
                }
            }),
        )?;
        let process = Arc::new(process);

        process.initialize().await?;
        let session_id = process.new_session(&request.cwd).await?;
        // Older agents may not implement mode switching.
        if let Err(e) = process
            .set_mode(&session_id, Self::mode_for(request.role))
            .await
        {
            match e {
                SupervisorError::Protocol { code: -32601, .. } => {
                    debug!("agent does not support set_mode; continuing")
                }
                other => warn!(error = %other, "set_mode failed; continuing"),
            }
        }

        let entry = Arc::new(ChildEntry {
            process,
            session_id,
            sink,
            transcript,
        });
        self.children
            .insert(request.agent_id.clone(), Arc::clone(&entry));
        Ok(entry)
    }
}

#[async_trait]
impl AgentProvider for ProcessAgentProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            name: self.config.name.clone(),
            supports_streaming: true,
            supports_interrupt: true,
            supports_health_check: true,
            supports_file_editing: true,
            supports_terminal: true,
            supports_tool_calling: true,
            max_concurrent_agents: self.config.max_concurrent_agents,
            priority: self.config.priority,
        }
    }

    async fn run_streaming(
        &self,
        request: AgentRequest,
        on_chunk: ChunkHandler,
    ) -> ProviderResult<AgentResponse> {
        let entry = self.ensure_child(&request).await?;

        *entry.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(on_chunk);
        entry
            .transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        let process = Arc::clone(&entry.process);
        let session_id = entry.session_id.clone();
        let prompt = request.prompt.clone();
        let mut turn =
            tokio::spawn(async move { process.prompt(&session_id, &prompt).await });

        let outcome = tokio::select! {
            joined = &mut turn => joined,
            _ = request.cancel.cancelled() => {
                // Cancellation is a notification; the child is expected to
                // emit a terminal prompt response shortly afterwards.
                let _ = entry.process.cancel(&entry.session_id).await;
                (&mut turn).await
            }
        };

        *entry.sink.lock().unwrap_or_else(|e| e.into_inner()) = None;

        let result = match outcome {
            Ok(result) => result,
            Err(join_error) => {
                return Err(ProviderError::Remote(format!(
                    "prompt task failed: {join_error}"
                )))
            }
        };
        let result = result?;

        let text = entry
            .transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Ok(AgentResponse {
            text,
            report: None,
            stop_reason: result
                .get("stopReason")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn is_healthy(&self, agent_id: &str) -> bool {
        match self.children.get(agent_id) {
            Some(entry) => entry.process.is_alive(),
            None => true,
        }
    }

    async fn interrupt(&self, agent_id: &str) {
        if let Some(entry) = self.children.get(agent_id) {
            if entry.process.is_alive() {
                let _ = entry.process.cancel(&entry.session_id).await;
            }
        }
    }

    async fn cleanup(&self, agent_id: &str) {
        if let Some((_, entry)) = self.children.remove(agent_id) {
            if let Err(e) = entry.process.kill().await {
                warn!(agent_id, error = %e, "failed to kill agent child during cleanup");
            }
        }
    }

    async fn shutdown(&self) {
        let ids: Vec<String> = self.children.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.cleanup(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_follow_roles() {
        assert_eq!(ProcessAgentProvider::mode_for(AgentRole::Coordinator), "plan");
        assert_eq!(ProcessAgentProvider::mode_for(AgentRole::Verifier), "plan");
        assert_eq!(ProcessAgentProvider::mode_for(AgentRole::Implementor), "build");
    }

    #[tokio::test]
    async fn unknown_agent_is_healthy_and_interrupt_is_noop() {
        let provider = ProcessAgentProvider::new(ProcessProviderConfig {
            name: "proc".to_string(),
            command: "/bin/false".to_string(),
            args: Vec::new(),
            priority: 0,
            max_concurrent_agents: 2,
        });
        assert!(provider.is_healthy("nobody").await);
        provider.interrupt("nobody").await;
        provider.cleanup("nobody").await;
    }
}

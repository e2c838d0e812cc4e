//! Provider over HTTP request/response plus server-sent events.
//!
//! The stdio transport is replaced wholesale: prompts go out as a POST,
//! and the child's `session/update` notifications come back as SSE
//! `data:` lines on the response body. The capability and chunk surfaces
//! are identical to the process-backed provider.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use atelier_agent_runtime::protocol::SessionUpdate;

use crate::{
    translate_update, AgentProvider, AgentRequest, AgentResponse, ChunkHandler,
    ProviderCapabilities, ProviderError, ProviderResult, StreamChunk,
};

/// Agent executor reached over HTTP+SSE.
#[derive(Debug)]
pub struct RemoteAgentProvider {
    name: String,
    endpoint: String,
    priority: i32,
    max_concurrent_agents: usize,
    client: reqwest::Client,
}

impl RemoteAgentProvider {
    /// Create the provider for a base endpoint, e.g.
    /// `https://agents.internal:8443`.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        priority: i32,
        max_concurrent_agents: usize,
    ) -> ProviderResult<Self> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Err(ProviderError::Configuration(
                "remote endpoint URL is required".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            priority,
            max_concurrent_agents,
            client: reqwest::Client::new(),
        })
    }
}

/// Extract the payload of one SSE line; returns `None` for comments,
/// blank keep-alives, and non-data fields.
fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Interpret one SSE payload: either a `session/update` object or the
/// terminal object carrying `stopReason`.
enum RemoteEvent {
    Update(SessionUpdate),
    Terminal { stop_reason: Option<String> },
}

fn parse_remote_event(payload: &str) -> Option<RemoteEvent> {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "unparseable SSE payload dropped");
            return None;
        }
    };
    if value.get("stopReason").is_some() {
        return Some(RemoteEvent::Terminal {
            stop_reason: value["stopReason"].as_str().map(str::to_string),
        });
    }
    match serde_json::from_value::<SessionUpdate>(value.get("update").cloned().unwrap_or(value)) {
        Ok(update) => Some(RemoteEvent::Update(update)),
        Err(e) => {
            warn!(error = %e, "SSE payload is neither update nor terminal; dropped");
            None
        }
    }
}

#[async_trait]
impl AgentProvider for RemoteAgentProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            name: self.name.clone(),
            supports_streaming: true,
            supports_interrupt: true,
            supports_health_check: true,
            supports_file_editing: true,
            supports_terminal: true,
            supports_tool_calling: true,
            max_concurrent_agents: self.max_concurrent_agents,
            priority: self.priority,
        }
    }

    async fn run_streaming(
        &self,
        request: AgentRequest,
        on_chunk: ChunkHandler,
    ) -> ProviderResult<AgentResponse> {
        let url = format!("{}/sessions/{}/prompt", self.endpoint, request.agent_id);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "role": request.role,
                "workspaceId": request.workspace_id,
                "cwd": request.cwd,
                "prompt": request.prompt,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Remote(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::Remote(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut text = String::new();
        let mut stop_reason = None;

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = request.cancel.cancelled() => {
                    let cancel_url = format!("{}/sessions/{}/cancel", self.endpoint, request.agent_id);
                    let _ = self.client.post(&cancel_url).send().await;
                    return Err(ProviderError::Cancelled);
                }
            };
            let Some(bytes) = next else { break };
            let bytes = bytes.map_err(|e| ProviderError::Remote(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let Some(payload) = sse_data(line.trim_end()) else {
                    continue;
                };
                match parse_remote_event(payload) {
                    Some(RemoteEvent::Update(update)) => {
                        if let Some(chunk) = translate_update(update) {
                            if let StreamChunk::Text { text: fragment } = &chunk {
                                text.push_str(fragment);
                            }
                            on_chunk(chunk);
                        }
                    }
                    Some(RemoteEvent::Terminal { stop_reason: reason }) => {
                        stop_reason = reason;
                        on_chunk(StreamChunk::Completed {
                            stop_reason: stop_reason.clone(),
                        });
                    }
                    None => {}
                }
            }
        }

        debug!(agent_id = %request.agent_id, "remote stream ended");
        Ok(AgentResponse {
            text,
            report: None,
            stop_reason,
        })
    }

    async fn is_healthy(&self, _agent_id: &str) -> bool {
        let url = format!("{}/health", self.endpoint);
        matches!(
            self.client.get(&url).send().await,
            Ok(response) if response.status().is_success()
        )
    }

    async fn interrupt(&self, agent_id: &str) {
        let url = format!("{}/sessions/{agent_id}/cancel", self.endpoint);
        let _ = self.client.post(&url).send().await;
    }

    async fn cleanup(&self, agent_id: &str) {
        let url = format!("{}/sessions/{agent_id}", self.endpoint);
        let _ = self.client.delete(&url).send().await;
    }

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_extraction() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data("event: update"), None);
    }

    #[test]
    fn remote_event_parsing() {
        let update = parse_remote_event(
            r#"{"update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"hi"}}}"#,
        );
        assert!(matches!(update, Some(RemoteEvent::Update(_))));

        let terminal = parse_remote_event(r#"{"stopReason":"end_turn"}"#);
        match terminal {
            Some(RemoteEvent::Terminal { stop_reason }) => {
                assert_eq!(stop_reason.as_deref(), Some("end_turn"))
            }
            other => panic!("unexpected: {}", other.is_some()),
        }

        assert!(parse_remote_event("not json").is_none());
    }

    #[test]
    fn empty_endpoint_is_a_configuration_error() {
        let err = RemoteAgentProvider::new("remote", "", 0, 4).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }
}

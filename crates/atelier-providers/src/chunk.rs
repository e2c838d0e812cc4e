//! Streaming chunks and the wire-dialect translation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use atelier_agent_runtime::protocol::{ContentBlock, SessionUpdate};
use atelier_types::CompletionReport;

/// Thinking stream phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThinkingPhase {
    /// Reasoning started.
    Start,
    /// A reasoning fragment.
    Chunk,
    /// Reasoning finished.
    End,
}

/// Tool invocation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolCallStatus {
    /// The call is running.
    InProgress,
    /// The call finished.
    Completed,
    /// The call failed.
    Failed,
}

/// One unit of streamed agent output, delivered to the caller during
/// `run_streaming`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
#[non_exhaustive]
pub enum StreamChunk {
    /// Visible reply text.
    Text {
        /// The fragment.
        text: String,
    },
    /// Reasoning text.
    Thinking {
        /// Stream phase.
        phase: ThinkingPhase,
        /// Fragment, absent on `Start`/`End` markers.
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// A tool invocation started or changed state.
    ToolCall {
        /// Tool name or title.
        name: String,
        /// Invocation status.
        status: ToolCallStatus,
    },
    /// Output of a finished tool invocation.
    ToolResult {
        /// Tool name, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Raw output payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    /// A live failure.
    Error {
        /// Failure description.
        message: String,
        /// Whether the run may still produce a result.
        recoverable: bool,
    },
    /// The turn ended.
    Completed {
        /// Stop reason reported by the agent.
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    /// Structured completion report.
    CompletionReport {
        /// The report.
        report: CompletionReport,
    },
    /// Keep-alive marker.
    Heartbeat,
}

/// Translate one wire `session/update` into a stream chunk.
///
/// Kinds that carry no caller-visible signal (plans, usage, mode and
/// command-palette updates) and unknown kinds yield `None`; unknown kinds
/// are additionally logged.
pub fn translate_update(update: SessionUpdate) -> Option<StreamChunk> {
    match update {
        SessionUpdate::AgentMessageChunk {
            content: ContentBlock::Text { text },
        } => Some(StreamChunk::Text { text }),
        SessionUpdate::AgentThoughtChunk {
            content: ContentBlock::Text { text },
        } => Some(StreamChunk::Thinking {
            phase: ThinkingPhase::Chunk,
            text: Some(text),
        }),
        SessionUpdate::ToolCall { title, status, .. } => Some(StreamChunk::ToolCall {
            name: title.unwrap_or_else(|| "tool".to_string()),
            status: parse_tool_status(status.as_deref()),
        }),
        SessionUpdate::ToolCallUpdate {
            tool_call_id,
            status,
            content,
        } => {
            if let Some(output) = content {
                Some(StreamChunk::ToolResult {
                    name: tool_call_id,
                    output: Some(output),
                })
            } else {
                Some(StreamChunk::ToolCall {
                    name: tool_call_id.unwrap_or_else(|| "tool".to_string()),
                    status: parse_tool_status(status.as_deref()),
                })
            }
        }
        SessionUpdate::Plan { .. }
        | SessionUpdate::UsageUpdate { .. }
        | SessionUpdate::CurrentModeUpdate { .. }
        | SessionUpdate::AvailableCommandsUpdate { .. }
        | SessionUpdate::SessionInfoUpdate { .. } => {
            debug!("session update carries no stream signal; skipped");
            None
        }
        SessionUpdate::Unknown => {
            warn!("unknown session update kind ignored");
            None
        }
    }
}

fn parse_tool_status(status: Option<&str>) -> ToolCallStatus {
    match status {
        Some("completed") => ToolCallStatus::Completed,
        Some("failed") => ToolCallStatus::Failed,
        _ => ToolCallStatus::InProgress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(update: Value) -> SessionUpdate {
        serde_json::from_value(update).unwrap()
    }

    #[test]
    fn message_and_thought_chunks() {
        let chunk = translate_update(parse(json!({
            "sessionUpdate": "agent_message_chunk",
            "content": {"type": "text", "text": "hi"}
        })));
        assert_eq!(chunk, Some(StreamChunk::Text { text: "hi".to_string() }));

        let chunk = translate_update(parse(json!({
            "sessionUpdate": "agent_thought_chunk",
            "content": {"type": "text", "text": "hmm"}
        })));
        assert!(matches!(
            chunk,
            Some(StreamChunk::Thinking { phase: ThinkingPhase::Chunk, .. })
        ));
    }

    #[test]
    fn tool_call_lifecycle() {
        let started = translate_update(parse(json!({
            "sessionUpdate": "tool_call",
            "toolCallId": "c1",
            "title": "read_file",
            "status": "in_progress"
        })));
        assert_eq!(
            started,
            Some(StreamChunk::ToolCall {
                name: "read_file".to_string(),
                status: ToolCallStatus::InProgress,
            })
        );

        let finished = translate_update(parse(json!({
            "sessionUpdate": "tool_call_update",
            "toolCallId": "c1",
            "status": "completed"
        })));
        assert_eq!(
            finished,
            Some(StreamChunk::ToolCall {
                name: "c1".to_string(),
                status: ToolCallStatus::Completed,
            })
        );

        let with_output = translate_update(parse(json!({
            "sessionUpdate": "tool_call_update",
            "toolCallId": "c1",
            "content": {"stdout": "ok"}
        })));
        assert!(matches!(with_output, Some(StreamChunk::ToolResult { .. })));
    }

    #[test]
    fn silent_and_unknown_kinds_are_skipped() {
        assert!(translate_update(parse(json!({"sessionUpdate": "plan", "entries": []}))).is_none());
        assert!(translate_update(parse(json!({"sessionUpdate": "usage_update"}))).is_none());
        assert!(translate_update(parse(json!({"sessionUpdate": "never_heard_of_it"}))).is_none());
    }
}

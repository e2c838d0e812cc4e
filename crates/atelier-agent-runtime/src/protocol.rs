//! Wire types and framing for the line-delimited JSON-RPC dialect.
//!
//! Each stdout line is one JSON-RPC object. A degraded-mode scanner
//! tolerates agents that concatenate several objects on one line without
//! separators by splitting on balanced braces (string- and escape-aware).
//! Stderr never carries protocol data.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// The JSON-RPC version every frame carries.
pub const JSONRPC_VERSION: &str = "2.0";

/// Host-side failure while serving a child request.
pub const ERROR_INTERNAL: i64 = -32000;

/// The child called a method the host does not support.
pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// Any object read off the child's stdout, before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcFrame {
    /// Request/response id; absent on notifications.
    pub id: Option<i64>,
    /// Method name; absent on responses.
    pub method: Option<String>,
    /// Request or notification parameters.
    #[serde(default)]
    pub params: Value,
    /// Response payload.
    pub result: Option<Value>,
    /// Response error.
    pub error: Option<RpcError>,
}

/// A classified inbound message.
#[derive(Debug)]
pub enum Inbound {
    /// Response to one of our requests.
    Response {
        /// The request id being answered.
        id: i64,
        /// The payload, or the child's error.
        outcome: Result<Value, RpcError>,
    },
    /// A request the child makes against the host.
    Request {
        /// The child's request id, echoed in our reply.
        id: i64,
        /// Requested method.
        method: String,
        /// Request parameters.
        params: Value,
    },
    /// A fire-and-forget notification.
    Notification {
        /// Notification method.
        method: String,
        /// Notification parameters.
        params: Value,
    },
}

/// Classify a frame. Frames that are neither response, request, nor
/// notification yield `None`.
pub fn classify(frame: RpcFrame) -> Option<Inbound> {
    match (frame.id, frame.method) {
        (Some(id), None) => {
            let outcome = match (frame.result, frame.error) {
                (_, Some(error)) => Err(error),
                (Some(result), None) => Ok(result),
                (None, None) => Ok(Value::Null),
            };
            Some(Inbound::Response { id, outcome })
        }
        (Some(id), Some(method)) => Some(Inbound::Request {
            id,
            method,
            params: frame.params,
        }),
        (None, Some(method)) => Some(Inbound::Notification {
            method,
            params: frame.params,
        }),
        (None, None) => None,
    }
}

/// Decode one stdout line into zero or more frames.
///
/// The whole line is tried first; on failure the balanced-brace scanner
/// extracts candidate objects and each is parsed independently. Segments
/// that still fail to parse are logged and dropped.
pub fn decode_line(line: &str) -> Vec<RpcFrame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let Ok(frame) = serde_json::from_str::<RpcFrame>(trimmed) {
        return vec![frame];
    }
    scan_objects(trimmed)
        .into_iter()
        .filter_map(|segment| match serde_json::from_str::<RpcFrame>(segment) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "dropping unparseable protocol segment");
                None
            }
        })
        .collect()
}

/// Degraded-mode framing: find balanced `{...}` spans in a line,
/// respecting JSON strings and escape sequences.
pub fn scan_objects(line: &str) -> Vec<&str> {
    let bytes = line.as_bytes();
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            objects.push(&line[s..=i]);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

//─────────────────────────────
//  Client-initiated methods
//─────────────────────────────

/// Parameters of `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Dialect revision the host speaks.
    pub protocol_version: u32,
    /// Host identification.
    pub client_info: ClientInfo,
}

/// Host identification sent during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Host name.
    pub name: String,
    /// Host version.
    pub version: String,
}

/// Parameters of `session/new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNewParams {
    /// Working directory of the session.
    pub cwd: String,
    /// MCP servers offered to the agent; empty in the core.
    pub mcp_servers: Vec<Value>,
}

/// Parameters of `session/prompt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    /// Session the prompt belongs to.
    pub session_id: String,
    /// Prompt content blocks.
    pub prompt: Vec<ContentBlock>,
}

/// One content block of a prompt or an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
    },
}

/// Parameters of `session/set_mode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetModeParams {
    /// Session whose mode changes.
    pub session_id: String,
    /// Target mode identifier.
    pub mode_id: String,
}

/// Parameters of the `session/cancel` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    /// Session being cancelled.
    pub session_id: String,
}

//─────────────────────────────
//  Server-initiated notifications
//─────────────────────────────

/// Parameters of a `session/update` notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdateParams {
    /// Session the update belongs to.
    pub session_id: Option<String>,
    /// The update payload.
    pub update: SessionUpdate,
}

/// The update kinds a child may emit mid-prompt. Unknown kinds are mapped
/// to [`SessionUpdate::Unknown`], logged by the consumer, and ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// A chunk of the agent's visible reply.
    AgentMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// A chunk of the agent's reasoning.
    AgentThoughtChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// A tool invocation started.
    #[serde(rename_all = "camelCase")]
    ToolCall {
        /// Stable id of the call.
        tool_call_id: Option<String>,
        /// Human-readable title or tool name.
        title: Option<String>,
        /// Invocation status as reported by the agent.
        status: Option<String>,
    },
    /// A running tool invocation changed state.
    #[serde(rename_all = "camelCase")]
    ToolCallUpdate {
        /// Stable id of the call.
        tool_call_id: Option<String>,
        /// New status.
        status: Option<String>,
        /// Output content, when finished.
        content: Option<Value>,
    },
    /// The agent published a plan.
    Plan {
        /// Plan entries, passed through untouched.
        entries: Option<Value>,
    },
    /// Token usage report.
    #[serde(rename_all = "camelCase")]
    UsageUpdate {
        /// Tokens consumed so far.
        used_tokens: Option<u64>,
        /// Context limit.
        max_tokens: Option<u64>,
    },
    /// The session switched modes.
    #[serde(rename_all = "camelCase")]
    CurrentModeUpdate {
        /// The new mode id.
        current_mode_id: Option<String>,
    },
    /// The command palette changed.
    AvailableCommandsUpdate {
        /// Commands, passed through untouched.
        commands: Option<Value>,
    },
    /// Session metadata changed.
    SessionInfoUpdate {
        /// Title, when provided.
        title: Option<String>,
    },
    /// Any kind this host does not understand.
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_response_request_notification() {
        let response = decode_line(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#);
        assert!(matches!(
            classify(response[0].clone()),
            Some(Inbound::Response { id: 3, outcome: Ok(_) })
        ));

        let error = decode_line(r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32000,"message":"no"}}"#);
        match classify(error[0].clone()) {
            Some(Inbound::Response { id: 4, outcome: Err(e) }) => assert_eq!(e.code, -32000),
            other => panic!("unexpected: {other:?}"),
        }

        let request = decode_line(r#"{"jsonrpc":"2.0","id":9,"method":"fs/read_text_file","params":{"path":"x"}}"#);
        assert!(matches!(
            classify(request[0].clone()),
            Some(Inbound::Request { id: 9, .. })
        ));

        let notification = decode_line(r#"{"jsonrpc":"2.0","method":"session/update","params":{}}"#);
        assert!(matches!(
            classify(notification[0].clone()),
            Some(Inbound::Notification { .. })
        ));
    }

    #[test]
    fn degraded_scan_splits_concatenated_objects() {
        let line = r#"{"jsonrpc":"2.0","id":1,"result":{}}{"jsonrpc":"2.0","id":2,"result":{"a":"}{"}}"#;
        let frames = decode_line(line);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].id, Some(1));
        assert_eq!(frames[1].id, Some(2));
        // The brace inside the string did not confuse the scanner.
        assert_eq!(frames[1].result.as_ref().unwrap()["a"], "}{");
    }

    #[test]
    fn scan_handles_escapes_and_garbage() {
        let line = r#"noise {"a":"\"}\\"} trailing"#;
        let objects = scan_objects(line);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0], r#"{"a":"\"}\\"}"#);

        assert!(decode_line("").is_empty());
        assert!(decode_line("not json at all").is_empty());
    }

    #[test]
    fn session_update_kinds_parse() {
        let params: SessionUpdateParams = serde_json::from_value(serde_json::json!({
            "sessionId": "s-1",
            "update": {"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": "hi"}}
        }))
        .unwrap();
        assert!(matches!(
            params.update,
            SessionUpdate::AgentMessageChunk { content: ContentBlock::Text { ref text } } if text == "hi"
        ));

        let unknown: SessionUpdateParams = serde_json::from_value(serde_json::json!({
            "sessionId": "s-1",
            "update": {"sessionUpdate": "something_new", "payload": 1}
        }))
        .unwrap();
        assert!(matches!(unknown.update, SessionUpdate::Unknown));
    }
}

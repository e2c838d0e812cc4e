//! Auto-replies to the requests a child agent makes against the host.

use serde_json::{json, Value};
use tracing::debug;

use crate::protocol::{RpcError, ERROR_INTERNAL, ERROR_METHOD_NOT_FOUND};

/// Serves child-initiated requests: permission grants are approved, file
/// reads and writes go against the local file system, terminal operations
/// are stubbed, and anything else is refused with `-32601`.
#[derive(Debug, Clone, Default)]
pub struct HostResponder;

impl HostResponder {
    /// Create a responder.
    pub fn new() -> Self {
        Self
    }

    /// Produce the reply for one inbound request.
    pub async fn respond(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            "session/request_permission" => {
                debug!("auto-approving permission request");
                Ok(json!({ "outcome": { "outcome": "approved" } }))
            }
            "fs/read_text_file" => {
                let path = require_path(params)?;
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => Ok(json!({ "content": content })),
                    Err(e) => Err(RpcError {
                        code: ERROR_INTERNAL,
                        message: format!("failed to read {path}: {e}"),
                    }),
                }
            }
            "fs/write_text_file" => {
                let path = require_path(params)?;
                let content = params
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match tokio::fs::write(&path, content).await {
                    Ok(()) => Ok(json!({})),
                    Err(e) => Err(RpcError {
                        code: ERROR_INTERNAL,
                        message: format!("failed to write {path}: {e}"),
                    }),
                }
            }
            m if m.starts_with("terminal/") => {
                // create/output/release/wait_for_exit/kill are stubbed.
                debug!(method = m, "stubbed terminal operation");
                Ok(json!({}))
            }
            other => Err(RpcError {
                code: ERROR_METHOD_NOT_FOUND,
                message: format!("method not supported: {other}"),
            }),
        }
    }
}

fn require_path(params: &Value) -> Result<String, RpcError> {
    params
        .get("path")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError {
            code: ERROR_INTERNAL,
            message: "missing required parameter: path".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permission_requests_are_approved() {
        let responder = HostResponder::new();
        let reply = responder
            .respond("session/request_permission", &json!({"options": []}))
            .await
            .unwrap();
        assert_eq!(reply["outcome"]["outcome"], "approved");
    }

    #[tokio::test]
    async fn file_round_trip() {
        let responder = HostResponder::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let path_str = path.to_str().unwrap();

        responder
            .respond(
                "fs/write_text_file",
                &json!({"path": path_str, "content": "hello"}),
            )
            .await
            .unwrap();

        let reply = responder
            .respond("fs/read_text_file", &json!({"path": path_str}))
            .await
            .unwrap();
        assert_eq!(reply["content"], "hello");
    }

    #[tokio::test]
    async fn missing_file_yields_internal_error() {
        let responder = HostResponder::new();
        let err = responder
            .respond("fs/read_text_file", &json!({"path": "/no/such/file"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ERROR_INTERNAL);
    }

    #[tokio::test]
    async fn terminal_methods_are_stubbed() {
        let responder = HostResponder::new();
        for method in [
            "terminal/create",
            "terminal/output",
            "terminal/release",
            "terminal/wait_for_exit",
            "terminal/kill",
        ] {
            let reply = responder.respond(method, &json!({})).await.unwrap();
            assert_eq!(reply, json!({}));
        }
    }

    #[tokio::test]
    async fn unknown_method_is_refused() {
        let responder = HostResponder::new();
        let err = responder.respond("gpu/allocate", &json!({})).await.unwrap_err();
        assert_eq!(err.code, ERROR_METHOD_NOT_FOUND);
    }
}

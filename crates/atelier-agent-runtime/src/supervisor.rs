//! Process supervision for one external agent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::protocol::{
    self, CancelParams, ClientInfo, ContentBlock, Inbound, InitializeParams, PromptParams,
    SessionNewParams, SetModeParams, ERROR_INTERNAL, JSONRPC_VERSION,
};
use crate::responder::HostResponder;
use crate::{deadline_for, ProtocolState, SupervisorError, SupervisorResult, KILL_GRACE};

/// Handler receiving every notification the child emits, untouched.
pub type NotificationHandler = Arc<dyn Fn(String, Value) + Send + Sync>;

/// How to launch the external agent.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Executable to run.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory; inherits the host's when absent.
    pub cwd: Option<PathBuf>,
}

struct PendingEntry {
    method: String,
    tx: oneshot::Sender<SupervisorResult<Value>>,
}

type PendingTable = Arc<StdMutex<HashMap<i64, PendingEntry>>>;

/// One supervised agent child process.
///
/// The stdout reader owns its buffer exclusively and runs on a dedicated
/// task; the pending-request table is mutated under a lock. Once the child
/// exits (or [`AgentProcess::kill`] runs), every pending request is
/// rejected with a transport error and the supervisor is permanently
/// [`ProtocolState::Dead`].
pub struct AgentProcess {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Arc<Mutex<Child>>,
    pending: PendingTable,
    next_id: AtomicI64,
    state: Arc<StdMutex<ProtocolState>>,
    alive: Arc<AtomicBool>,
    session_id: StdMutex<Option<String>>,
}

impl AgentProcess {
    /// Spawn the child and start its stdio loops.
    ///
    /// Must be called within a Tokio runtime.
    #[instrument(skip_all, fields(command = %config.command))]
    pub fn spawn(
        config: SpawnConfig,
        responder: HostResponder,
        notifications: NotificationHandler,
    ) -> SupervisorResult<Self> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::Transport("child stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SupervisorError::Transport("child stderr unavailable".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::Transport("child stdin unavailable".to_string()))?;

        let stdin = Arc::new(Mutex::new(Some(stdin)));
        let pending: PendingTable = Arc::new(StdMutex::new(HashMap::new()));
        let state = Arc::new(StdMutex::new(ProtocolState::Spawning));
        let alive = Arc::new(AtomicBool::new(true));

        // Stderr is diagnostic only, never protocol data.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(stderr = %line, "agent diagnostic");
            }
        });

        {
            let stdin = Arc::clone(&stdin);
            let pending = Arc::clone(&pending);
            let state = Arc::clone(&state);
            let alive = Arc::clone(&alive);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    for frame in protocol::decode_line(&line) {
                        match protocol::classify(frame) {
                            Some(Inbound::Response { id, outcome }) => {
                                let entry = pending
                                    .lock()
                                    .unwrap_or_else(|e| e.into_inner())
                                    .remove(&id);
                                match entry {
                                    Some(entry) => {
                                        let outcome = outcome.map_err(|e| {
                                            SupervisorError::Protocol {
                                                code: e.code,
                                                message: e.message,
                                            }
                                        });
                                        let _ = entry.tx.send(outcome);
                                    }
                                    // Deadline already fired for this id.
                                    None => debug!(id, "late or unknown response ignored"),
                                }
                            }
                            Some(Inbound::Request { id, method, params }) => {
                                let reply = match responder.respond(&method, &params).await {
                                    Ok(result) => json!({
                                        "jsonrpc": JSONRPC_VERSION,
                                        "id": id,
                                        "result": result,
                                    }),
                                    Err(error) => json!({
                                        "jsonrpc": JSONRPC_VERSION,
                                        "id": id,
                                        "error": error,
                                    }),
                                };
                                if let Err(e) = write_line(&stdin, &reply).await {
                                    warn!(method = %method, error = %e, "failed to answer child request");
                                }
                            }
                            Some(Inbound::Notification { method, params }) => {
                                (notifications)(method, params);
                            }
                            None => warn!("frame with neither id nor method dropped"),
                        }
                    }
                }
                info!("agent stdout closed");
                mark_dead(&alive, &state, &pending, "agent process exited");
            });
        }

        Ok(Self {
            stdin,
            child: Arc::new(Mutex::new(child)),
            pending,
            next_id: AtomicI64::new(1),
            state,
            alive,
            session_id: StdMutex::new(None),
        })
    }

    /// Whether the child is still believed to be running.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Current protocol state.
    pub fn state(&self) -> ProtocolState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Session id negotiated via [`AgentProcess::new_session`], if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Send a request and await its response within a deadline.
    ///
    /// The default deadline depends on the method (10 s handshake, 5 min
    /// prompt, 30 s otherwise); `deadline` overrides it. On timeout the
    /// pending entry is discarded and any late response is ignored.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        deadline: Option<Duration>,
    ) -> SupervisorResult<Value> {
        if !self.is_alive() {
            return Err(SupervisorError::Transport(
                "agent process is not alive".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                PendingEntry {
                    method: method.to_string(),
                    tx,
                },
            );

        let frame = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": method,
            "params": params,
        });
        if let Err(e) = write_line(&self.stdin, &frame).await {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            mark_dead(&self.alive, &self.state, &self.pending, "stdin unwritable");
            return Err(SupervisorError::Transport(format!(
                "failed to write request: {e}"
            )));
        }

        let deadline = deadline.unwrap_or_else(|| deadline_for(method));
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SupervisorError::Transport(
                "agent exited while request was pending".to_string(),
            )),
            Err(_) => {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                warn!(method, ?deadline, "request deadline reached");
                Err(SupervisorError::Timeout {
                    method: method.to_string(),
                    deadline,
                })
            }
        }
    }

    /// Send a notification: no id, no reply expected.
    pub async fn send_notification(&self, method: &str, params: Value) -> SupervisorResult<()> {
        let frame = json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
            "params": params,
        });
        write_line(&self.stdin, &frame)
            .await
            .map_err(|e| SupervisorError::Transport(format!("failed to write notification: {e}")))
    }

    //─────────────────────────────
    //  Dialect operations
    //─────────────────────────────

    /// Perform the `initialize` handshake.
    pub async fn initialize(&self) -> SupervisorResult<Value> {
        self.expect_state(ProtocolState::Spawning)?;
        let params = serde_json::to_value(InitializeParams {
            protocol_version: 1,
            client_info: ClientInfo {
                name: "atelier".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })?;
        let result = self.send_request("initialize", params, None).await?;
        self.set_state(ProtocolState::Initialized);
        Ok(result)
    }

    /// Open a session rooted at `cwd`; returns the child's session id.
    pub async fn new_session(&self, cwd: &str) -> SupervisorResult<String> {
        self.expect_state(ProtocolState::Initialized)?;
        let params = serde_json::to_value(SessionNewParams {
            cwd: cwd.to_string(),
            mcp_servers: Vec::new(),
        })?;
        let result = self.send_request("session/new", params, None).await?;
        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SupervisorError::Protocol {
                code: ERROR_INTERNAL,
                message: "session/new response missing sessionId".to_string(),
            })?
            .to_string();
        *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(session_id.clone());
        self.set_state(ProtocolState::SessionOpen);
        Ok(session_id)
    }

    /// Send one prompt turn and await its terminal response.
    pub async fn prompt(&self, session_id: &str, text: &str) -> SupervisorResult<Value> {
        self.expect_state(ProtocolState::SessionOpen)?;
        self.set_state(ProtocolState::Prompting);
        let params = serde_json::to_value(PromptParams {
            session_id: session_id.to_string(),
            prompt: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        })?;
        let outcome = self.send_request("session/prompt", params, None).await;
        if self.is_alive() {
            self.set_state(ProtocolState::SessionOpen);
        }
        outcome
    }

    /// Switch the session mode (e.g. read-only planning vs. full build).
    pub async fn set_mode(&self, session_id: &str, mode_id: &str) -> SupervisorResult<Value> {
        let params = serde_json::to_value(SetModeParams {
            session_id: session_id.to_string(),
            mode_id: mode_id.to_string(),
        })?;
        self.send_request("session/set_mode", params, None).await
    }

    /// Ask the child to cancel the in-flight prompt.
    ///
    /// This is a notification: the supervisor writes it and returns
    /// immediately; the child is expected to emit a terminal prompt
    /// response shortly afterwards.
    pub async fn cancel(&self, session_id: &str) -> SupervisorResult<()> {
        if self.state() == ProtocolState::Prompting {
            self.set_state(ProtocolState::Cancelling);
        }
        let params = serde_json::to_value(CancelParams {
            session_id: session_id.to_string(),
        })?;
        self.send_notification("session/cancel", params).await
    }

    /// Terminate the child: close stdin (the dialect's shutdown signal),
    /// wait up to [`KILL_GRACE`], then force-kill.
    #[instrument(skip(self))]
    pub async fn kill(&self) -> SupervisorResult<()> {
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(KILL_GRACE, child.wait()).await {
            Ok(Ok(status)) => info!(?status, "agent exited after shutdown signal"),
            Ok(Err(e)) => warn!(error = %e, "failed to await agent exit"),
            Err(_) => {
                warn!("agent ignored shutdown; force-killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
        mark_dead(&self.alive, &self.state, &self.pending, "killed by supervisor");
        Ok(())
    }

    fn expect_state(&self, expected: ProtocolState) -> SupervisorResult<()> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(SupervisorError::InvalidState { expected, actual })
        }
    }

    fn set_state(&self, next: ProtocolState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

async fn write_line(stdin: &Arc<Mutex<Option<ChildStdin>>>, frame: &Value) -> std::io::Result<()> {
    let mut guard = stdin.lock().await;
    let stdin = guard.as_mut().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin already closed")
    })?;
    let mut line = serde_json::to_vec(frame).map_err(std::io::Error::other)?;
    line.push(b'\n');
    stdin.write_all(&line).await?;
    stdin.flush().await
}

fn mark_dead(
    alive: &AtomicBool,
    state: &StdMutex<ProtocolState>,
    pending: &StdMutex<HashMap<i64, PendingEntry>>,
    reason: &str,
) {
    alive.store(false, Ordering::SeqCst);
    *state.lock().unwrap_or_else(|e| e.into_inner()) = ProtocolState::Dead;

    let entries: Vec<PendingEntry> = pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .drain()
        .map(|(_, entry)| entry)
        .collect();
    for entry in entries {
        debug!(method = %entry.method, reason, "rejecting pending request");
        let _ = entry.tx.send(Err(SupervisorError::Transport(format!(
            "{reason} while {} was pending",
            entry.method
        ))));
    }
}

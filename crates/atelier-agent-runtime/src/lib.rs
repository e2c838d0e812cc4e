#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **atelier-agent-runtime** – External agent process supervision.
//!
//! This crate gives an in-process caller a typed interface over an
//! out-of-process agent that speaks a line-delimited JSON-RPC dialect on
//! its standard streams, and that may request services from the host
//! mid-turn (file I/O, permission grants, terminal operations).
//!
//! The moving parts:
//!
//! - **[`AgentProcess`]**: spawns and supervises one child, demultiplexes
//!   responses, inbound host requests, and notifications, and enforces
//!   per-request deadlines.
//! - **[`HostResponder`]**: auto-replies to the requests a child is
//!   expected to make against the host.
//! - **[`protocol`]**: the wire types and the framing helpers, including
//!   the degraded balanced-brace scanner for agents that concatenate
//!   objects without newline separators.

use std::time::Duration;

pub mod protocol;
mod responder;
mod supervisor;

pub use responder::HostResponder;
pub use supervisor::{AgentProcess, NotificationHandler, SpawnConfig};

/// Deadline for `initialize` and `session/new`.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

/// Deadline for `session/prompt`.
pub const PROMPT_DEADLINE: Duration = Duration::from_secs(300);

/// Deadline for every other outbound request.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Grace period between asking the child to terminate and force-killing it.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Protocol state of one supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Child spawned, `initialize` not yet acknowledged.
    Spawning,
    /// `initialize` acknowledged.
    Initialized,
    /// `session/new` acknowledged; prompts may be sent.
    SessionOpen,
    /// A `session/prompt` is in flight.
    Prompting,
    /// A cancel notification was written; awaiting the terminal prompt
    /// response.
    Cancelling,
    /// The child exited or was killed. Terminal.
    Dead,
}

/// Errors surfaced by the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The child could not be spawned.
    #[error("failed to spawn agent process: {0}")]
    Spawn(#[from] std::io::Error),
    /// The child died, its stdin became unwritable, or it closed stdout.
    #[error("agent transport failed: {0}")]
    Transport(String),
    /// The child answered with a JSON-RPC error.
    #[error("agent protocol error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// A per-request deadline elapsed.
    #[error("request {method} timed out after {deadline:?}")]
    Timeout {
        /// The method that timed out.
        method: String,
        /// The deadline that elapsed.
        deadline: Duration,
    },
    /// The operation is not valid in the current protocol state.
    #[error("invalid protocol state: expected {expected:?}, was {actual:?}")]
    InvalidState {
        /// State the operation requires.
        expected: ProtocolState,
        /// State the supervisor was in.
        actual: ProtocolState,
    },
    /// A value could not be serialized onto the wire.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for supervisor operations.
pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;

/// Default deadline for an outbound request by method name.
pub(crate) fn deadline_for(method: &str) -> Duration {
    match method {
        "initialize" | "session/new" => HANDSHAKE_DEADLINE,
        "session/prompt" => PROMPT_DEADLINE,
        _ => DEFAULT_DEADLINE,
    }
}

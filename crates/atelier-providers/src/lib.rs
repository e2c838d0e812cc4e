#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **atelier-providers** – Agent executors behind one capability surface.
//!
//! A provider runs an agent for a role and declares what it can do via
//! [`ProviderCapabilities`]. The [`ProviderRouter`] picks the
//! highest-priority provider whose capabilities satisfy a role's
//! requirements; registration order breaks ties.
//!
//! Variants shipped here:
//!
//! - [`ProcessAgentProvider`] – one supervised child process per agent id,
//!   speaking the line-delimited JSON-RPC dialect.
//! - [`WorkspaceAgentProvider`] – same transport, single-agent usage with
//!   a richer tool registry.
//! - [`RemoteAgentProvider`] – HTTP request/response plus server-sent
//!   events instead of stdio; identical chunk surface.
//! - [`ScriptedProvider`] – in-process executor that plays configured
//!   turns; used by tests and offline runs.

mod capabilities;
mod chunk;
mod error;
mod process;
mod remote;
mod router;
mod scripted;
mod traits;
mod workspace;

pub use capabilities::{requirements_for, ProviderCapabilities, Requirement};
pub use chunk::{translate_update, StreamChunk, ThinkingPhase, ToolCallStatus};
pub use error::{ProviderError, ProviderResult};
pub use process::{ProcessAgentProvider, ProcessProviderConfig};
pub use remote::RemoteAgentProvider;
pub use router::ProviderRouter;
pub use scripted::{ScriptedProvider, ScriptedTurn};
pub use traits::{AgentProvider, AgentRequest, AgentResponse, ChunkHandler};
pub use workspace::WorkspaceAgentProvider;

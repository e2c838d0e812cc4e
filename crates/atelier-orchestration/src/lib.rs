#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **atelier-orchestration** – The orchestration engine of Atelier.
//!
//! A user request flows through an ordered pipeline: the Coordinator plans,
//! the plan is parsed into tasks, ready tasks are delegated to Implementors,
//! and a Verifier approves or rejects the wave. A rejection loops the
//! pipeline back to the implementation stage only; planning and
//! registration never re-run within one execution.
//!
//! The crate also houses the `@@@task` block parser, the coordinator state
//! machine that tracks wave progress from bus events, the session manager
//! mapping external session ids to independent orchestration instances,
//! and the registry binding coordination and host tools into one
//! role-dependent surface.

use atelier_store::StoreError;
use atelier_providers::ProviderError;

pub mod coordinator;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod stages;

pub use coordinator::{CoordinationState, CoordinatorStateMachine};
pub use parser::{parse_tasks, render_tasks};
pub use pipeline::{
    OrchestratorResult, Pipeline, PipelineConfig, PipelineContext, PipelinePhase, PhaseHandler,
    Stage, StageOutcome, TaskSummary,
};
pub use registry::{HostTools, ToolBinding, ToolRegistry};
pub use session::{OrchestrationHandle, SessionEntry, SessionManager};

/// Errors surfaced by pipeline stages and the session manager.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// A provider invocation or selection failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A coordination tool call failed.
    #[error("tool call failed: {0}")]
    Tool(String),
    /// A stage was invoked without its precondition.
    #[error("stage precondition failed: {0}")]
    Precondition(String),
    /// The referenced session is not live in this process.
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// Result alias for orchestration operations.
pub type OrchestrationResult<T> = std::result::Result<T, OrchestrationError>;

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **atelier-store** – In-memory entity stores for Atelier.
//!
//! This crate provides the non-persistent storage backends for agents,
//! tasks, and conversations. All data lives in memory and is lost when the
//! process terminates; a durable backend can be fitted later behind the
//! same query surface.
//!
//! Every store is a cheap-clone handle over shared state. Reads return
//! copies so callers can never mutate store internals, and writes to a
//! given entity id are serialized by the store's lock.

mod agent;
mod conversation;
mod task;

pub use agent::AgentStore;
pub use conversation::{ConversationFilter, ConversationStore};
pub use task::TaskStore;

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `"agent"` or `"task"`.
        kind: &'static str,
        /// The missing id.
        id: String,
    },
    /// An entity failed validation on the way in.
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

//! Provider and routing error kinds.

use atelier_types::AgentRole;

use crate::ProviderCapabilities;

/// Errors surfaced by providers and the router.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// No registered provider satisfies the role's requirements.
    #[error("no suitable provider for role {role:?}: requires [{}], registered: [{}]",
        .requirements.join(", "),
        .registered.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", "))]
    NoSuitableProvider {
        /// The role that could not be routed.
        role: AgentRole,
        /// Requirement labels the role carries.
        requirements: Vec<String>,
        /// Every registered capability record, for diagnosis.
        registered: Vec<ProviderCapabilities>,
    },
    /// The supervised child failed.
    #[error(transparent)]
    Supervisor(#[from] atelier_agent_runtime::SupervisorError),
    /// The remote endpoint failed.
    #[error("remote transport failed: {0}")]
    Remote(String),
    /// The provider is misconfigured (missing endpoint, bad command).
    #[error("provider configuration error: {0}")]
    Configuration(String),
    /// The run was cancelled by the host.
    #[error("run cancelled")]
    Cancelled,
}

/// Result alias for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

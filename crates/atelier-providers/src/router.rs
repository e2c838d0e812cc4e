//! Per-role provider selection.

use std::sync::Arc;

use tracing::{debug, info};

use atelier_types::AgentRole;

use crate::{
    requirements_for, AgentProvider, AgentRequest, AgentResponse, ChunkHandler, ProviderError,
    ProviderResult,
};

/// Routes each role to the highest-priority provider satisfying its
/// requirements; registration order breaks priority ties.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    providers: Vec<Arc<dyn AgentProvider>>,
}

impl ProviderRouter {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Order matters for tie-breaking.
    pub fn register(&mut self, provider: Arc<dyn AgentProvider>) {
        info!(name = %provider.capabilities().name, "provider registered");
        self.providers.push(provider);
    }

    /// Number of registered providers.
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Select the provider for a role.
    ///
    /// Fails deterministically with [`ProviderError::NoSuitableProvider`]
    /// naming the role, its requirements, and every registered capability
    /// record when no candidate qualifies.
    pub fn select_for_role(&self, role: AgentRole) -> ProviderResult<Arc<dyn AgentProvider>> {
        let requirements = requirements_for(role);
        let mut best: Option<Arc<dyn AgentProvider>> = None;
        for provider in &self.providers {
            let capabilities = provider.capabilities();
            if !requirements.iter().all(|r| r.satisfied_by(&capabilities)) {
                continue;
            }
            // Strict comparison keeps the earliest registration on ties.
            let better = match &best {
                Some(current) => capabilities.priority > current.capabilities().priority,
                None => true,
            };
            if better {
                best = Some(Arc::clone(provider));
            }
        }
        match best {
            Some(provider) => {
                debug!(role = role.as_str(), provider = %provider.capabilities().name, "provider selected");
                Ok(provider)
            }
            None => Err(ProviderError::NoSuitableProvider {
                role,
                requirements: requirements.iter().map(|r| r.label().to_string()).collect(),
                registered: self.providers.iter().map(|p| p.capabilities()).collect(),
            }),
        }
    }

    /// Run a request through the provider selected for its role.
    pub async fn run(&self, request: AgentRequest) -> ProviderResult<AgentResponse> {
        self.select_for_role(request.role)?.run(request).await
    }

    /// Stream a request through the provider selected for its role.
    pub async fn run_streaming(
        &self,
        request: AgentRequest,
        on_chunk: ChunkHandler,
    ) -> ProviderResult<AgentResponse> {
        self.select_for_role(request.role)?
            .run_streaming(request, on_chunk)
            .await
    }

    /// Conjunction of health across every registered provider.
    pub async fn is_healthy(&self, agent_id: &str) -> bool {
        for provider in &self.providers {
            if !provider.is_healthy(agent_id).await {
                return false;
            }
        }
        true
    }

    /// Fan an interrupt out to every provider.
    pub async fn interrupt(&self, agent_id: &str) {
        for provider in &self.providers {
            provider.interrupt(agent_id).await;
        }
    }

    /// Fan a cleanup out to every provider.
    pub async fn cleanup(&self, agent_id: &str) {
        for provider in &self.providers {
            provider.cleanup(agent_id).await;
        }
    }

    /// Shut every provider down.
    pub async fn shutdown(&self) {
        for provider in &self.providers {
            provider.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProviderCapabilities, ScriptedProvider};

    fn provider(name: &str, priority: i32, terminal: bool) -> Arc<dyn AgentProvider> {
        Arc::new(ScriptedProvider::new(ProviderCapabilities {
            name: name.to_string(),
            supports_streaming: true,
            supports_interrupt: true,
            supports_health_check: true,
            supports_file_editing: terminal,
            supports_terminal: terminal,
            supports_tool_calling: true,
            max_concurrent_agents: 4,
            priority,
        }))
    }

    #[test]
    fn highest_priority_wins_ties_go_to_registration_order() {
        let mut router = ProviderRouter::new();
        router.register(provider("low", 1, true));
        router.register(provider("first-high", 5, true));
        router.register(provider("second-high", 5, true));

        let selected = router.select_for_role(AgentRole::Implementor).unwrap();
        assert_eq!(selected.capabilities().name, "first-high");
    }

    #[test]
    fn routing_failure_names_role_requirements_and_providers() {
        let mut router = ProviderRouter::new();
        router.register(provider("planner-only", 1, false));

        let err = router.select_for_role(AgentRole::Implementor).unwrap_err();
        match &err {
            ProviderError::NoSuitableProvider {
                role,
                requirements,
                registered,
            } => {
                assert_eq!(*role, AgentRole::Implementor);
                assert!(requirements.contains(&"needsFileEditing".to_string()));
                assert!(requirements.contains(&"needsTerminal".to_string()));
                assert_eq!(registered.len(), 1);
                assert_eq!(registered[0].name, "planner-only");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let rendered = err.to_string();
        assert!(rendered.contains("needsTerminal"));
        assert!(rendered.contains("planner-only"));
    }

    #[test]
    fn verifier_needs_terminal_only() {
        let mut router = ProviderRouter::new();
        router.register(provider("terminal", 1, true));
        assert!(router.select_for_role(AgentRole::Verifier).is_ok());
        assert!(router.select_for_role(AgentRole::Coordinator).is_ok());
    }
}

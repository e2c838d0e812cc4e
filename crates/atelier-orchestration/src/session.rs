//! Session registry: one orchestration instance per external session id.
//!
//! The in-memory map is authoritative for live sessions; the directory is
//! an advisory tuple kept alongside it. The process-wide anchor survives
//! module reloads, and a session id known to the directory but absent from
//! memory (a cold start) resolves to nothing rather than being
//! reconstructed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, info};

use atelier_bus::EventBus;
use atelier_providers::{ChunkHandler, ProviderRouter};
use atelier_store::{AgentStore, ConversationStore, TaskStore};
use atelier_tools::CoordinationTools;

use crate::coordinator::CoordinatorStateMachine;
use crate::pipeline::{
    OrchestratorResult, Pipeline, PipelineConfig, PipelineContext, PhaseHandler,
};
use crate::registry::ToolRegistry;

/// Default session time-to-live.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Advisory directory tuple for one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    /// The session id.
    pub session_id: String,
    /// The session's workspace.
    pub workspace_id: String,
    /// Name of the provider the session was created with.
    pub provider: String,
    /// Coarse lifecycle marker.
    pub status: String,
    /// Creation instant; TTL is measured from here.
    pub created_at: DateTime<Utc>,
}

/// One session's full orchestration object graph.
pub struct OrchestrationHandle {
    /// The session id.
    pub session_id: String,
    /// The session's workspace.
    pub workspace_id: String,
    /// Shared event bus.
    pub bus: EventBus,
    /// Coordination tool surface over the session stores.
    pub tools: CoordinationTools,
    /// Role-dependent tool registry.
    pub registry: ToolRegistry,
    /// Provider router.
    pub router: Arc<ProviderRouter>,
    /// The pipeline run by [`OrchestrationHandle::execute`].
    pub pipeline: Arc<Pipeline>,
    /// Coordination state machine, already attached to the bus.
    pub machine: CoordinatorStateMachine,
    /// Pipeline tuning.
    pub config: PipelineConfig,
    phase_handler: Option<PhaseHandler>,
    chunk_handler: Option<ChunkHandler>,
}

impl OrchestrationHandle {
    /// Run the session's pipeline on one user request.
    pub async fn execute(&self, request: &str, cwd: &str) -> OrchestratorResult {
        let machine = self.machine.clone();
        let caller_phase = self.phase_handler.clone();
        let phase: PhaseHandler = Arc::new(move |phase| {
            machine.observe_phase(phase);
            if let Some(handler) = &caller_phase {
                handler(phase);
            }
        });

        let mut ctx = PipelineContext::new(
            request,
            &self.workspace_id,
            cwd,
            self.tools.clone(),
            Arc::clone(&self.router),
            self.config.clone(),
        )
        .with_phase_handler(phase);
        if let Some(chunks) = &self.chunk_handler {
            ctx = ctx.with_chunk_handler(Arc::clone(chunks));
        }

        self.pipeline.execute(&mut ctx).await
    }
}

struct ManagerInner {
    sessions: DashMap<String, Arc<OrchestrationHandle>>,
    directory: DashMap<String, SessionEntry>,
    ttl: Duration,
}

/// Process-wide session registry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

// The anchor keeps the manager's map alive across module reloads.
static GLOBAL_MANAGER: Lazy<SessionManager> = Lazy::new(|| SessionManager::with_ttl(SESSION_TTL));

impl SessionManager {
    /// The process-wide manager.
    pub fn global() -> &'static SessionManager {
        &GLOBAL_MANAGER
    }

    /// A manager with a custom TTL; used by tests and embedders that want
    /// isolation from the global anchor.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                sessions: DashMap::new(),
                directory: DashMap::new(),
                ttl,
            }),
        }
    }

    /// Instantiate fresh stores, bus, tools, router, and pipeline for a
    /// session, and record its directory entry.
    pub fn create_session(
        &self,
        session_id: impl Into<String>,
        workspace_id: impl Into<String>,
        router: Arc<ProviderRouter>,
        config: PipelineConfig,
        on_phase: Option<PhaseHandler>,
        on_chunk: Option<ChunkHandler>,
    ) -> Arc<OrchestrationHandle> {
        let session_id = session_id.into();
        let workspace_id = workspace_id.into();

        let bus = EventBus::new();
        let tools = CoordinationTools::new(
            AgentStore::new(),
            TaskStore::new(),
            ConversationStore::new(),
            bus.clone(),
        );
        let registry = ToolRegistry::new(tools.clone(), None);
        let machine = CoordinatorStateMachine::new();
        machine.attach_to_bus(&bus);

        let provider_name = router
            .select_for_role(atelier_types::AgentRole::Coordinator)
            .map(|p| p.capabilities().name)
            .unwrap_or_else(|_| "unrouted".to_string());

        let handle = Arc::new(OrchestrationHandle {
            session_id: session_id.clone(),
            workspace_id: workspace_id.clone(),
            bus,
            tools,
            registry,
            router,
            pipeline: Arc::new(Pipeline::standard()),
            machine,
            config,
            phase_handler: on_phase,
            chunk_handler: on_chunk,
        });

        self.inner
            .sessions
            .insert(session_id.clone(), Arc::clone(&handle));
        self.inner.directory.insert(
            session_id.clone(),
            SessionEntry {
                session_id: session_id.clone(),
                workspace_id,
                provider: provider_name,
                status: "active".to_string(),
                created_at: Utc::now(),
            },
        );

        info!(session_id = %session_id, "session created");
        handle
    }

    /// Look a live session up. Expired sessions are swept on access;
    /// directory-only ids (cold starts) resolve to `None` without
    /// reconstruction.
    pub fn get_session(&self, session_id: &str) -> Option<Arc<OrchestrationHandle>> {
        if self.is_expired(session_id) {
            debug!(session_id, "session expired; sweeping");
            self.delete_session(session_id);
            return None;
        }
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a session from memory and from the directory.
    pub fn delete_session(&self, session_id: &str) {
        self.inner.sessions.remove(session_id);
        self.inner.directory.remove(session_id);
    }

    /// Ids of live (unexpired) sessions.
    pub fn list_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| !self.is_expired(id))
            .collect();
        ids.sort();
        ids
    }

    /// Every directory entry, including ones whose in-memory instance is
    /// gone.
    pub fn list_sessions_from_directory(&self) -> Vec<SessionEntry> {
        let mut entries: Vec<SessionEntry> = self
            .inner
            .directory
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        entries
    }

    fn is_expired(&self, session_id: &str) -> bool {
        self.inner
            .directory
            .get(session_id)
            .map(|entry| {
                let age = Utc::now().signed_duration_since(entry.created_at);
                age.to_std().map(|age| age > self.inner.ttl).unwrap_or(false)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_providers::ScriptedProvider;

    fn router() -> Arc<ProviderRouter> {
        let mut router = ProviderRouter::new();
        router.register(Arc::new(ScriptedProvider::with_full_capabilities("scripted")));
        Arc::new(router)
    }

    #[test]
    fn create_get_delete_round_trip() {
        let manager = SessionManager::with_ttl(SESSION_TTL);
        manager.create_session("s-1", "ws-1", router(), PipelineConfig::default(), None, None);

        let handle = manager.get_session("s-1").unwrap();
        assert_eq!(handle.workspace_id, "ws-1");
        assert_eq!(manager.list_sessions(), vec!["s-1".to_string()]);

        manager.delete_session("s-1");
        assert!(manager.get_session("s-1").is_none());
        assert!(manager.list_sessions().is_empty());
    }

    #[test]
    fn cold_start_miss_returns_none() {
        let manager = SessionManager::with_ttl(SESSION_TTL);
        manager.create_session("s-1", "ws-1", router(), PipelineConfig::default(), None, None);
        // Simulate a restart that kept the directory but lost memory.
        manager.inner.sessions.remove("s-1");

        assert!(manager.get_session("s-1").is_none());
        // The directory still advertises the id.
        assert_eq!(manager.list_sessions_from_directory().len(), 1);
    }

    #[test]
    fn expired_sessions_are_swept_on_access() {
        let manager = SessionManager::with_ttl(Duration::from_secs(0));
        manager.create_session("s-1", "ws-1", router(), PipelineConfig::default(), None, None);
        std::thread::sleep(Duration::from_millis(10));

        assert!(manager.get_session("s-1").is_none());
        assert!(manager.list_sessions_from_directory().is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let manager = SessionManager::with_ttl(SESSION_TTL);
        let a = manager.create_session("s-a", "ws-a", router(), PipelineConfig::default(), None, None);
        let b = manager.create_session("s-b", "ws-b", router(), PipelineConfig::default(), None, None);

        // Publishing on one session's bus is invisible to the other.
        let seen = Arc::new(std::sync::Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        b.bus.subscribe_direct(Arc::new(move |_| {
            *sink.lock().unwrap() += 1;
        }));
        a.bus.publish(&atelier_types::AgentEvent::MessageReceived {
            agent_id: "x".to_string(),
            from_agent_id: "y".to_string(),
            workspace_id: "ws-a".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}

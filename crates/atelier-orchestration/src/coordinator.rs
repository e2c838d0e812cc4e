//! Coordination-phase tracking alongside the pipeline.
//!
//! The machine advances on pipeline phases and on bus events: when every
//! Implementor of the current wave has reached a terminal status the wave
//! is complete, and any agent error moves the machine to `Error`. State
//! listeners are isolated from the caller: they run synchronously but a
//! panicking listener is logged and swallowed.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use atelier_bus::EventBus;
use atelier_types::{AgentEvent, AgentStatus};

use crate::pipeline::PipelinePhase;

/// States of the coordination machine.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinationState {
    /// The Coordinator is planning.
    Planning,
    /// A plan exists; tasks are registered.
    Ready,
    /// Implementors are working.
    Executing,
    /// Every active Implementor finished.
    WaveComplete,
    /// The Verifier is judging the wave.
    Verifying,
    /// The request is satisfied.
    Completed,
    /// Something failed.
    Error(String),
}

/// Listener invoked on every state change.
pub type StateListener = Arc<dyn Fn(&CoordinationState) + Send + Sync>;

#[derive(Default)]
struct MachineInner {
    state: Option<CoordinationState>,
    active_crafters: HashSet<String>,
    listeners: Vec<StateListener>,
}

/// The coordination state machine. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct CoordinatorStateMachine {
    inner: Arc<Mutex<MachineInner>>,
}

impl CoordinatorStateMachine {
    /// A fresh machine with no state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, if any transition happened yet.
    pub fn state(&self) -> Option<CoordinationState> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .state
            .clone()
    }

    /// Number of Implementors currently tracked as active.
    pub fn active_crafter_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active_crafters
            .len()
    }

    /// Register a state-change listener. Listeners must not block; a
    /// panicking listener is swallowed.
    pub fn on_state_change(&self, listener: StateListener) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .push(listener);
    }

    /// Subscribe the machine to a session's bus. Returns the direct
    /// subscription id.
    pub fn attach_to_bus(&self, bus: &EventBus) -> String {
        let machine = self.clone();
        bus.subscribe_direct(Arc::new(move |event: &AgentEvent| {
            machine.observe_event(event);
        }))
    }

    /// Advance on one pipeline phase.
    pub fn observe_phase(&self, phase: &PipelinePhase) {
        match phase {
            PipelinePhase::Planning => self.transition(CoordinationState::Planning),
            PipelinePhase::TasksRegistered { .. } => self.transition(CoordinationState::Ready),
            PipelinePhase::CrafterRunning { .. } => self.transition(CoordinationState::Executing),
            PipelinePhase::VerificationStarting { .. } => {
                self.transition(CoordinationState::Verifying)
            }
            PipelinePhase::Completed | PipelinePhase::MaxWavesReached { .. } => {
                self.transition(CoordinationState::Completed)
            }
            PipelinePhase::Failed { stage, message } => {
                self.transition(CoordinationState::Error(format!("{stage}: {message}")))
            }
            _ => {}
        }
    }

    /// Advance on one bus event.
    pub fn observe_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::TaskDelegated { agent_id, .. } => {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.active_crafters.insert(agent_id.clone());
                debug!(agent_id = %agent_id, active = inner.active_crafters.len(), "crafter active");
            }
            AgentEvent::AgentCompleted { agent_id, .. } => {
                self.retire_crafter(agent_id);
            }
            AgentEvent::AgentStatusChanged { agent_id, to, .. } => match to {
                AgentStatus::Error => {
                    self.transition(CoordinationState::Error(format!("agent failed: {agent_id}")))
                }
                status if status.is_terminal() => self.retire_crafter(agent_id),
                _ => {}
            },
            _ => {}
        }
    }

    /// Remove an agent from the active set; an emptied set completes the
    /// wave.
    fn retire_crafter(&self, agent_id: &str) {
        let emptied = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let was_tracked = inner.active_crafters.remove(agent_id);
            was_tracked && inner.active_crafters.is_empty()
        };
        if emptied {
            self.transition(CoordinationState::WaveComplete);
        }
    }

    fn transition(&self, next: CoordinationState) {
        let listeners = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.state.as_ref() == Some(&next) {
                return;
            }
            debug!(?next, "coordination state changed");
            inner.state = Some(next.clone());
            if matches!(next, CoordinationState::WaveComplete) {
                inner.active_crafters.clear();
            }
            inner.listeners.clone()
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&next))).is_err() {
                warn!("state listener panicked; swallowed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn delegated(agent_id: &str) -> AgentEvent {
        AgentEvent::TaskDelegated {
            task_id: "t".to_string(),
            agent_id: agent_id.to_string(),
            caller_agent_id: "coordinator".to_string(),
            workspace_id: "ws".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn completed(agent_id: &str) -> AgentEvent {
        AgentEvent::AgentCompleted {
            agent_id: agent_id.to_string(),
            workspace_id: "ws".to_string(),
            report: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn wave_completes_when_all_crafters_finish() {
        let machine = CoordinatorStateMachine::new();
        machine.observe_event(&delegated("a"));
        machine.observe_event(&delegated("b"));
        assert_eq!(machine.active_crafter_count(), 2);

        machine.observe_event(&completed("a"));
        assert_ne!(machine.state(), Some(CoordinationState::WaveComplete));

        machine.observe_event(&completed("b"));
        assert_eq!(machine.state(), Some(CoordinationState::WaveComplete));
        assert_eq!(machine.active_crafter_count(), 0);
    }

    #[test]
    fn untracked_completions_do_not_complete_waves() {
        let machine = CoordinatorStateMachine::new();
        machine.observe_event(&completed("stranger"));
        assert_eq!(machine.state(), None);
    }

    #[test]
    fn agent_error_moves_to_error() {
        let machine = CoordinatorStateMachine::new();
        machine.observe_event(&AgentEvent::AgentStatusChanged {
            agent_id: "a".to_string(),
            workspace_id: "ws".to_string(),
            from: AgentStatus::Active,
            to: AgentStatus::Error,
            timestamp: Utc::now(),
        });
        assert!(matches!(machine.state(), Some(CoordinationState::Error(_))));
    }

    #[test]
    fn listeners_cannot_break_the_machine() {
        let machine = CoordinatorStateMachine::new();
        machine.on_state_change(Arc::new(|_| panic!("bad listener")));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        machine.on_state_change(Arc::new(move |state| {
            sink.lock().unwrap().push(state.clone());
        }));

        machine.observe_phase(&PipelinePhase::Planning);
        machine.observe_phase(&PipelinePhase::TasksRegistered { count: 1 });

        let states = seen.lock().unwrap();
        assert_eq!(
            *states,
            vec![CoordinationState::Planning, CoordinationState::Ready]
        );
    }

    #[test]
    fn phases_drive_the_happy_path() {
        let machine = CoordinatorStateMachine::new();
        machine.observe_phase(&PipelinePhase::Planning);
        machine.observe_phase(&PipelinePhase::TasksRegistered { count: 2 });
        machine.observe_phase(&PipelinePhase::CrafterRunning {
            task_id: "t".to_string(),
        });
        machine.observe_phase(&PipelinePhase::VerificationStarting { wave: 1 });
        machine.observe_phase(&PipelinePhase::Completed);
        assert_eq!(machine.state(), Some(CoordinationState::Completed));
    }

    #[test]
    fn bus_attachment_feeds_the_machine() {
        let bus = EventBus::new();
        let machine = CoordinatorStateMachine::new();
        machine.attach_to_bus(&bus);

        bus.publish(&delegated("a"));
        bus.publish(&completed("a"));
        assert_eq!(machine.state(), Some(CoordinationState::WaveComplete));
    }
}

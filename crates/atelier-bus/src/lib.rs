#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **atelier-bus** – Event broker for Atelier.
//!
//! Two subscription modes coexist on one bus:
//!
//! 1. *Direct handlers* – closures keyed by a subscription id, invoked
//!    synchronously in publication order. A failing handler is logged and
//!    swallowed; it never reaches the publisher and never blocks sibling
//!    handlers.
//! 2. *Buffered per-agent subscriptions* – events matching a declared filter
//!    are appended to a per-agent queue that the agent drains atomically on
//!    its next turn.
//!
//! The bus additionally keeps a bounded, timestamped log of critical events
//! (creation, completion, delegation, status changes) for post-mortem
//! replay. The bus holds agent *ids* only, never agent references.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::{debug, warn};

use atelier_types::AgentEvent;

/// Per-agent pending-event queue bound; the oldest event is dropped (and
/// the drop logged) when a queue is full.
pub const MAX_PENDING_EVENTS: usize = 256;

/// Number of critical events retained for replay.
pub const REPLAY_LOG_CAPACITY: usize = 512;

/// A direct handler invoked synchronously on every published event.
pub type DirectHandler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Filter declared by a buffered per-agent subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionFilter {
    /// Subscribing agent.
    pub agent_id: String,
    /// Subscriber's display name, for diagnostics.
    pub agent_name: String,
    /// Event type discriminators to deliver; empty means all types.
    pub event_types: Vec<String>,
    /// Skip events whose subject is the subscriber itself.
    pub exclude_self: bool,
}

/// One entry of the critical-event replay log.
#[derive(Debug, Clone)]
pub struct ReplayEntry {
    /// When the event was published.
    pub recorded_at: DateTime<Utc>,
    /// The event itself.
    pub event: AgentEvent,
}

struct BufferedSubscription {
    filter: SubscriptionFilter,
    queue: VecDeque<AgentEvent>,
}

impl BufferedSubscription {
    fn matches(&self, event: &AgentEvent) -> bool {
        if self.filter.exclude_self
            && event.subject_agent_id() == Some(self.filter.agent_id.as_str())
        {
            return false;
        }
        self.filter.event_types.is_empty()
            || self
                .filter
                .event_types
                .iter()
                .any(|t| t == event.event_type())
    }
}

/// Errors surfaced by bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// No subscription is registered under the given id.
    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),
}

/// The publish/subscribe broker.
///
/// Clones share the same broker state. Publication is synchronous: by the
/// time [`EventBus::publish`] returns, every direct handler has run and
/// every matching queue has been appended to, in publication order.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    // IndexMap keeps handler iteration deterministic across publications.
    handlers: RwLock<IndexMap<String, DirectHandler>>,
    subscriptions: Mutex<HashMap<String, BufferedSubscription>>,
    replay: Mutex<VecDeque<ReplayEntry>>,
}

impl EventBus {
    /// Create a new, empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to every direct handler and matching queue.
    pub fn publish(&self, event: &AgentEvent) {
        debug!(event_type = event.event_type(), workspace = event.workspace_id(), "publish");

        if event.is_critical() {
            let mut replay = self.inner.replay.lock().unwrap_or_else(|e| e.into_inner());
            if replay.len() == REPLAY_LOG_CAPACITY {
                replay.pop_front();
            }
            replay.push_back(ReplayEntry {
                recorded_at: Utc::now(),
                event: event.clone(),
            });
        }

        // Emission iterates a snapshot so handlers may (un)subscribe freely.
        let handlers: Vec<(String, DirectHandler)> = {
            let table = self.inner.handlers.read().unwrap_or_else(|e| e.into_inner());
            table
                .iter()
                .map(|(id, h)| (id.clone(), Arc::clone(h)))
                .collect()
        };
        for (id, handler) in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            if outcome.is_err() {
                warn!(subscription = %id, event_type = event.event_type(), "direct handler panicked; swallowed");
            }
        }

        let mut subscriptions = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for sub in subscriptions.values_mut() {
            if !sub.matches(event) {
                continue;
            }
            if sub.queue.len() == MAX_PENDING_EVENTS {
                sub.queue.pop_front();
                warn!(
                    agent = %sub.filter.agent_name,
                    "pending-event queue full, dropped oldest event"
                );
            }
            sub.queue.push_back(event.clone());
        }
    }

    /// Register a direct handler; returns the subscription id used to
    /// remove it later.
    pub fn subscribe_direct(&self, handler: DirectHandler) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), handler);
        id
    }

    /// Remove a direct handler.
    pub fn unsubscribe(&self, subscription_id: &str) -> Result<(), BusError> {
        let removed = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .shift_remove(subscription_id);
        match removed {
            Some(_) => Ok(()),
            None => Err(BusError::UnknownSubscription(subscription_id.to_string())),
        }
    }

    /// Declare (or replace) the buffered subscription for an agent.
    pub fn subscribe_agent(&self, filter: SubscriptionFilter) {
        let mut subscriptions = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subscriptions.insert(
            filter.agent_id.clone(),
            BufferedSubscription {
                filter,
                queue: VecDeque::new(),
            },
        );
    }

    /// Atomically remove and return an agent's pending events.
    ///
    /// Unknown agents (or agents without a subscription) drain to empty.
    pub fn drain_pending_events(&self, agent_id: &str) -> Vec<AgentEvent> {
        let mut subscriptions = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subscriptions
            .get_mut(agent_id)
            .map(|sub| sub.queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Copy of the critical-event replay log, oldest first.
    pub fn replay_log(&self) -> Vec<ReplayEntry> {
        self.inner
            .replay
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Number of registered direct handlers.
    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_types::{AgentRole, AgentStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn created(agent_id: &str, workspace: &str) -> AgentEvent {
        AgentEvent::AgentCreated {
            agent_id: agent_id.to_string(),
            agent_name: agent_id.to_string(),
            role: AgentRole::Implementor,
            workspace_id: workspace.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn message_received(recipient: &str, sender: &str) -> AgentEvent {
        AgentEvent::MessageReceived {
            agent_id: recipient.to_string(),
            from_agent_id: sender.to_string(),
            workspace_id: "ws".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn direct_handlers_see_publication_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe_direct(Arc::new(move |event| {
            if let AgentEvent::AgentCreated { agent_id, .. } = event {
                seen_clone.lock().unwrap().push(agent_id.clone());
            }
        }));

        bus.publish(&created("a", "ws"));
        bus.publish(&created("b", "ws"));
        bus.publish(&created("c", "ws"));

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn handler_panic_is_swallowed() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.subscribe_direct(Arc::new(|_| panic!("boom")));
        let calls_clone = Arc::clone(&calls);
        bus.subscribe_direct(Arc::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish(&created("a", "ws"));
        // The panicking handler did not block its sibling.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let bus = EventBus::new();
        let id = bus.subscribe_direct(Arc::new(|_| {}));
        assert_eq!(bus.handler_count(), 1);
        bus.unsubscribe(&id).unwrap();
        assert_eq!(bus.handler_count(), 0);
        assert!(matches!(
            bus.unsubscribe(&id),
            Err(BusError::UnknownSubscription(_))
        ));
    }

    #[test]
    fn buffered_subscription_filters_and_drains() {
        let bus = EventBus::new();
        bus.subscribe_agent(SubscriptionFilter {
            agent_id: "watcher".to_string(),
            agent_name: "watcher".to_string(),
            event_types: vec!["agentCreated".to_string()],
            exclude_self: true,
        });

        bus.publish(&created("other", "ws"));
        bus.publish(&created("watcher", "ws")); // excluded: self
        bus.publish(&message_received("watcher", "other")); // excluded: type

        let drained = bus.drain_pending_events("watcher");
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].subject_agent_id(), Some("other"));

        // The drain was atomic: nothing left.
        assert!(bus.drain_pending_events("watcher").is_empty());
        assert!(bus.drain_pending_events("nobody").is_empty());
    }

    #[test]
    fn queue_drops_oldest_on_overflow() {
        let bus = EventBus::new();
        bus.subscribe_agent(SubscriptionFilter {
            agent_id: "watcher".to_string(),
            agent_name: "watcher".to_string(),
            event_types: Vec::new(),
            exclude_self: false,
        });

        for i in 0..(MAX_PENDING_EVENTS + 3) {
            bus.publish(&created(&format!("agent-{i}"), "ws"));
        }

        let drained = bus.drain_pending_events("watcher");
        assert_eq!(drained.len(), MAX_PENDING_EVENTS);
        // The first three were dropped.
        assert_eq!(drained[0].subject_agent_id(), Some("agent-3"));
    }

    #[test]
    fn replay_log_keeps_critical_events_only() {
        let bus = EventBus::new();
        bus.publish(&created("a", "ws"));
        bus.publish(&message_received("a", "b")); // not critical
        bus.publish(&AgentEvent::AgentStatusChanged {
            agent_id: "a".to_string(),
            workspace_id: "ws".to_string(),
            from: AgentStatus::Pending,
            to: AgentStatus::Active,
            timestamp: Utc::now(),
        });

        let log = bus.replay_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].event.event_type(), "agentCreated");
        assert_eq!(log[1].event.event_type(), "agentStatusChanged");
    }
}

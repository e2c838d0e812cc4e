//! Conversation store: append-only per-agent message sequences.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use atelier_types::{Message, MessageRole};

use crate::StoreResult;

/// Read filter for conversation queries.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    /// Return only the last N messages (applied after range filtering).
    pub last_n: Option<usize>,
    /// Inclusive lower bound on the `turn` field.
    pub start_turn: Option<u32>,
    /// Inclusive upper bound on the `turn` field.
    pub end_turn: Option<u32>,
    /// When false, `Tool`-role messages are dropped from the result.
    pub include_tool_calls: bool,
}

/// In-memory conversation store.
///
/// Messages are append-only per agent; insertion order is preserved, which
/// together with the per-message timestamp defines conversation order.
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl ConversationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to its agent's conversation.
    pub async fn append(&self, message: &Message) -> StoreResult<()> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(message.agent_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    /// Full conversation for an agent, copied out in append order.
    pub async fn conversation(&self, agent_id: &str) -> Vec<Message> {
        self.conversations
            .read()
            .await
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Conversation for an agent after applying `filter`.
    pub async fn conversation_filtered(
        &self,
        agent_id: &str,
        filter: &ConversationFilter,
    ) -> Vec<Message> {
        let mut messages = self.conversation(agent_id).await;

        if filter.start_turn.is_some() || filter.end_turn.is_some() {
            messages.retain(|m| {
                m.turn
                    .map(|turn| {
                        filter.start_turn.map_or(true, |s| turn >= s)
                            && filter.end_turn.map_or(true, |e| turn <= e)
                    })
                    .unwrap_or(false)
            });
        }

        if !filter.include_tool_calls {
            messages.retain(|m| m.role != MessageRole::Tool);
        }

        if let Some(n) = filter.last_n {
            if messages.len() > n {
                messages.drain(..messages.len() - n);
            }
        }

        messages
    }

    /// Number of messages in an agent's conversation.
    pub async fn count(&self, agent_id: &str) -> usize {
        self.conversations
            .read()
            .await
            .get(agent_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// The most recent message matching `role`, if any.
    pub async fn last_with_role(&self, agent_id: &str, role: MessageRole) -> Option<Message> {
        self.conversations
            .read()
            .await
            .get(agent_id)
            .and_then(|msgs| msgs.iter().rev().find(|m| m.role == role).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> ConversationStore {
        let store = ConversationStore::new();
        for (i, (role, content)) in [
            (MessageRole::System, "system prompt"),
            (MessageRole::User, "do the thing"),
            (MessageRole::Tool, "tool output"),
            (MessageRole::Assistant, "done"),
        ]
        .into_iter()
        .enumerate()
        {
            let mut msg = Message::new("agent-1", role, content).unwrap();
            msg.turn = Some(i as u32);
            store.append(&msg).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let store = seeded_store().await;
        let conversation = store.conversation("agent-1").await;
        assert_eq!(conversation.len(), 4);
        assert_eq!(conversation[0].content, "system prompt");
        assert_eq!(conversation[3].content, "done");
        assert_eq!(store.count("agent-1").await, 4);
        assert_eq!(store.count("unknown").await, 0);
    }

    #[tokio::test]
    async fn filter_drops_tool_messages() {
        let store = seeded_store().await;
        let filter = ConversationFilter {
            include_tool_calls: false,
            ..Default::default()
        };
        let filtered = store.conversation_filtered("agent-1", &filter).await;
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|m| m.role != MessageRole::Tool));
    }

    #[tokio::test]
    async fn filter_last_n_and_turn_range() {
        let store = seeded_store().await;

        let filter = ConversationFilter {
            last_n: Some(2),
            include_tool_calls: true,
            ..Default::default()
        };
        let last_two = store.conversation_filtered("agent-1", &filter).await;
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].content, "done");

        let filter = ConversationFilter {
            start_turn: Some(1),
            end_turn: Some(2),
            include_tool_calls: true,
            ..Default::default()
        };
        let range = store.conversation_filtered("agent-1", &filter).await;
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].content, "do the thing");
    }

    #[tokio::test]
    async fn last_with_role_scans_backwards() {
        let store = seeded_store().await;
        let last = store
            .last_with_role("agent-1", MessageRole::Assistant)
            .await
            .unwrap();
        assert_eq!(last.content, "done");
        assert!(store.last_with_role("agent-1", MessageRole::Tool).await.is_some());
    }
}

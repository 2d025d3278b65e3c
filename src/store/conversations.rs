use std::cmp::Ordering;

use serde::Serialize;

use super::models::ConversationListItem;
use super::Shared;
use crate::api::{ApiClient, ApiError};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationListState {
    pub conversations: Vec<ConversationListItem>,
    pub total: usize,
    /// First load into an empty list; the sidebar shows a spinner.
    pub is_loading: bool,
    /// Reload while entries are already on screen.
    pub is_refreshing: bool,
    pub error: Option<String>,
}

/// Sidebar list of known conversations, independent of the open one.
#[derive(Clone)]
pub struct ConversationStore {
    state: Shared<ConversationListState>,
    client: ApiClient,
    limit: u32,
}

impl ConversationStore {
    pub fn new(client: ApiClient, limit: u32) -> Self {
        Self {
            state: Shared::default(),
            client,
            limit,
        }
    }

    pub fn state(&self) -> ConversationListState {
        self.state.snapshot()
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.state
            .lock()
            .conversations
            .iter()
            .any(|c| c.conversation_id == conversation_id)
    }

    pub async fn fetch_conversations(&self) -> Result<Vec<ConversationListItem>, ApiError> {
        {
            let mut state = self.state.lock();
            if state.conversations.is_empty() {
                state.is_loading = true;
            } else {
                state.is_refreshing = true;
            }
            state.error = None;
        }

        let result = self.client.list_conversations(self.limit).await;

        let mut state = self.state.lock();
        state.is_loading = false;
        state.is_refreshing = false;
        match result {
            Ok(page) => {
                let mut conversations = page.conversations;
                sort_by_recency(&mut conversations);
                tracing::debug!(count = conversations.len(), "conversation list loaded");
                state.total = page.total.max(conversations.len());
                state.conversations = conversations.clone();
                Ok(conversations)
            }
            Err(err) => {
                tracing::warn!("failed to load conversations: {}", err);
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Puts `item` at the head of the list. Returns `false` and leaves the
    /// list alone when the id is already known.
    pub fn add_conversation(&self, item: ConversationListItem) -> bool {
        let mut state = self.state.lock();
        if state
            .conversations
            .iter()
            .any(|c| c.conversation_id == item.conversation_id)
        {
            return false;
        }
        tracing::debug!(conversation_id = %item.conversation_id, "conversation added");
        state.conversations.insert(0, item);
        state.total += 1;
        true
    }

    pub fn update_conversation_title(&self, conversation_id: &str, title: &str) -> bool {
        let mut state = self.state.lock();
        match state
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            Some(item) => {
                item.title = Some(title.to_string());
                true
            }
            None => false,
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = ConversationListState::default();
    }
}

/// Most recent first. Entries without a timestamp go last and keep their
/// relative order.
pub fn sort_by_recency(items: &mut [ConversationListItem]) {
    items.sort_by(|a, b| match (&a.last_message_at, &b.last_message_at) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

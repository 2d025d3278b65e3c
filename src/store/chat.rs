use chrono::Utc;
use serde::Serialize;

use super::conversations::ConversationStore;
use super::models::{ConversationDetail, ConversationListItem, Message};
use super::Shared;
use crate::api::{ApiClient, ApiError, ChatCompletion, ChatStreamObserver, ChatStreamSession};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatState {
    pub current_conversation_id: Option<String>,
    pub title: Option<String>,
    pub messages: Vec<Message>,
    pub current_streaming_content: String,
    pub is_loading: bool,
    pub is_streaming: bool,
    pub error: Option<String>,
    /// Bumped by every send, switch, load and clear. Async results carrying an
    /// older value are dropped.
    #[serde(skip)]
    generation: u64,
}

impl ChatState {
    /// Messages that belong to the active conversation.
    pub fn visible_messages(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.conversation_id == self.current_conversation_id)
            .collect()
    }

    pub fn is_busy(&self) -> bool {
        self.is_loading || self.is_streaming
    }

    // Resets everything shown for the old conversation and invalidates
    // in-flight work.
    fn switch_to(&mut self, conversation_id: Option<String>) -> u64 {
        let generation = self.generation + 1;
        *self = ChatState {
            current_conversation_id: conversation_id,
            generation,
            ..ChatState::default()
        };
        generation
    }
}

/// Authoritative client-side view of the open conversation.
#[derive(Clone)]
pub struct ChatStore {
    state: Shared<ChatState>,
    client: ApiClient,
    conversations: ConversationStore,
    message_limit: Option<u32>,
}

impl ChatStore {
    pub fn new(
        client: ApiClient,
        conversations: ConversationStore,
        message_limit: Option<u32>,
    ) -> Self {
        Self {
            state: Shared::default(),
            client,
            conversations,
            message_limit,
        }
    }

    pub fn state(&self) -> ChatState {
        self.state.snapshot()
    }

    pub async fn send_message(&self, query: &str) -> Result<Message, ApiError> {
        self.send_message_with(query, |_| {}).await
    }

    /// Like [`send_message`](Self::send_message), also handing each applied
    /// chunk to `on_chunk` (for live rendering).
    pub async fn send_message_with(
        &self,
        query: &str,
        on_chunk: impl FnMut(&str),
    ) -> Result<Message, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            let err = ApiError::Validation("Query cannot be empty".into());
            self.state.lock().error = Some(err.to_string());
            return Err(err);
        }

        let (generation, target, provisional_id) = {
            let mut state = self.state.lock();
            if state.is_busy() {
                return Err(ApiError::Busy);
            }
            state.generation += 1;
            let provisional = Message::provisional_user(query, state.current_conversation_id.clone());
            let provisional_id = provisional.id.clone();
            state.messages.push(provisional);
            state.current_streaming_content.clear();
            state.is_loading = true;
            state.is_streaming = false;
            state.error = None;
            (
                state.generation,
                state.current_conversation_id.clone(),
                provisional_id,
            )
        };

        tracing::debug!(
            conversation_id = target.as_deref().unwrap_or("<new>"),
            "sending message"
        );

        let mut observer = StoreObserver {
            store: self,
            generation,
            provisional_id,
            starts_conversation: target.is_none(),
            on_chunk,
        };
        let mut session = ChatStreamSession::new(&self.client, query, target)?;
        let completion = session.run(&mut observer).await?;
        Ok(completion.message)
    }

    /// Switches the active conversation. Returns `false` when `conversation_id`
    /// is already active.
    pub fn set_conversation_id(&self, conversation_id: Option<&str>) -> bool {
        let mut state = self.state.lock();
        if state.current_conversation_id.as_deref() == conversation_id {
            return false;
        }
        state.switch_to(conversation_id.map(str::to_string));
        true
    }

    pub async fn load_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationDetail, ApiError> {
        let generation = {
            let mut state = self.state.lock();
            let generation = state.switch_to(Some(conversation_id.to_string()));
            state.is_loading = true;
            generation
        };

        let result = self
            .client
            .get_messages(conversation_id, self.message_limit)
            .await;

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                tracing::debug!(conversation_id, "discarding superseded conversation load");
                return result;
            }
            state.is_loading = false;
            // The requested id stays active even when loading it failed.
            state.current_conversation_id = Some(conversation_id.to_string());
            match &result {
                Ok(detail) => {
                    state.messages = detail.messages.clone();
                    state.title = detail.title.clone();
                }
                Err(err) => {
                    tracing::warn!(conversation_id, "failed to load conversation: {}", err);
                    state.error = Some(err.to_string());
                }
            }
        }

        if let Ok(ConversationDetail {
            title: Some(title), ..
        }) = &result
        {
            self.conversations
                .update_conversation_title(conversation_id, title);
        }
        result
    }

    /// Picks up the title the backend generates while answering and shares it
    /// with the sidebar.
    pub async fn sync_conversation_title(
        &self,
        conversation_id: &str,
    ) -> Result<Option<String>, ApiError> {
        let detail = self.client.get_messages(conversation_id, Some(1)).await?;
        let Some(title) = detail.title.filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };

        self.conversations
            .update_conversation_title(conversation_id, &title);
        let mut state = self.state.lock();
        if state.current_conversation_id.as_deref() == Some(conversation_id) {
            state.title = Some(title.clone());
        }
        Ok(Some(title))
    }

    pub fn clear_chat(&self) {
        self.state.lock().switch_to(None);
    }
}

struct StoreObserver<'a, F> {
    store: &'a ChatStore,
    generation: u64,
    provisional_id: String,
    starts_conversation: bool,
    on_chunk: F,
}

impl<F: FnMut(&str)> ChatStreamObserver for StoreObserver<'_, F> {
    fn on_chunk(&mut self, chunk: &str) {
        {
            let mut state = self.store.state.lock();
            if state.generation != self.generation {
                return;
            }
            state.current_streaming_content.push_str(chunk);
            // Loading covers the wait for the first byte; from here on the
            // request is streaming.
            state.is_loading = false;
            state.is_streaming = true;
        }
        (self.on_chunk)(chunk);
    }

    fn on_complete(&mut self, completion: &ChatCompletion) {
        let conversation_id = &completion.conversation_id;
        {
            let mut state = self.store.state.lock();
            if state.generation == self.generation {
                if let Some(provisional) = state
                    .messages
                    .iter_mut()
                    .find(|m| m.id == self.provisional_id)
                {
                    provisional.pending = false;
                    provisional.conversation_id = Some(conversation_id.clone());
                }
                state.messages.push(completion.message.clone());
                state.current_streaming_content.clear();
                state.is_loading = false;
                state.is_streaming = false;
                state.current_conversation_id = Some(conversation_id.clone());
            } else {
                tracing::debug!(%conversation_id, "discarding completion for abandoned request");
            }
        }

        // The conversation exists server-side now, whether or not it is
        // still on screen.
        if self.starts_conversation && !self.store.conversations.contains(conversation_id) {
            self.store.conversations.add_conversation(ConversationListItem::new(
                conversation_id.clone(),
                Some(Utc::now()),
            ));
        }
    }

    fn on_error(&mut self, error: &ApiError) {
        let mut state = self.store.state.lock();
        if state.generation != self.generation {
            return;
        }
        state.messages.retain(|m| m.id != self.provisional_id);
        state.current_streaming_content.clear();
        state.is_loading = false;
        state.is_streaming = false;
        state.error = Some(error.to_string());
        if error.is_conversation_not_found() {
            state.current_conversation_id = None;
            state.title = None;
        }
    }
}

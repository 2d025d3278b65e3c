use crate::store::models::{ConversationListItem, Message, Role};
use crate::store::{ChatState, Stores};

/// Sends `query` in the active conversation (or starts one), streaming chunks
/// to `on_chunk`. A new conversation's generated title is synced afterwards.
pub async fn send_message(
    stores: &Stores,
    query: &str,
    on_chunk: impl FnMut(&str),
) -> Result<String, String> {
    let was_new = stores.chat.state().current_conversation_id.is_none();
    stores
        .chat
        .send_message_with(query, on_chunk)
        .await
        .map_err(|e| e.to_string())?;

    if was_new {
        if let Some(conversation_id) = stores.chat.state().current_conversation_id {
            if let Err(err) = stores.chat.sync_conversation_title(&conversation_id).await {
                tracing::debug!(%conversation_id, "title sync failed: {}", err);
            }
        }
    }
    // The answer was already printed chunk by chunk.
    Ok(String::new())
}

pub fn new_conversation(stores: &Stores) -> String {
    stores.chat.clear_chat();
    "Started a new conversation.".to_string()
}

pub async fn list_conversations(stores: &Stores) -> Result<String, String> {
    let items = stores
        .conversations
        .fetch_conversations()
        .await
        .map_err(|e| e.to_string())?;
    let active = stores.chat.state().current_conversation_id;
    Ok(render_conversation_list(&items, active.as_deref()))
}

/// `target` is a conversation id or a 1-based position in the last list.
pub async fn open_conversation(stores: &Stores, target: &str) -> Result<String, String> {
    let conversation_id = resolve_target(&stores.conversations.state().conversations, target);
    stores
        .chat
        .load_conversation(&conversation_id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(render_history(&stores.chat.state()))
}

pub fn history(stores: &Stores) -> String {
    render_history(&stores.chat.state())
}

fn resolve_target(items: &[ConversationListItem], target: &str) -> String {
    target
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|index| items.get(index))
        .map(|item| item.conversation_id.clone())
        .unwrap_or_else(|| target.to_string())
}

pub fn render_conversation_list(items: &[ConversationListItem], active: Option<&str>) -> String {
    if items.is_empty() {
        return "No conversations yet.".to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let marker = if active == Some(item.conversation_id.as_str()) {
                '*'
            } else {
                ' '
            };
            let when = item
                .last_message_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{}{:>3}. {}  [{}]  {}",
                marker,
                i + 1,
                item.display_title(),
                when,
                item.conversation_id
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_history(state: &ChatState) -> String {
    let header = match (&state.current_conversation_id, &state.title) {
        (None, _) => "New conversation".to_string(),
        (Some(id), Some(title)) => format!("{} ({})", title, id),
        (Some(id), None) => id.clone(),
    };
    let messages = state.visible_messages();
    if messages.is_empty() {
        return format!("{}\n(no messages)", header);
    }
    let body = messages
        .into_iter()
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{}\n\n{}", header, body)
}

fn render_message(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
    };
    let pending = if message.pending { " (sending)" } else { "" };
    format!("{}{}: {}", speaker, pending, message.content)
}

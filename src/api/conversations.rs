use serde::Deserialize;

use super::{ensure_success, read_json, ApiClient, ApiError};
use crate::store::models::{count, ConversationDetail, ConversationListItem};

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationPage {
    #[serde(default)]
    pub conversations: Vec<ConversationListItem>,
    #[serde(default, deserialize_with = "count")]
    pub total: usize,
}

impl ApiClient {
    pub async fn list_conversations(&self, limit: u32) -> Result<ConversationPage, ApiError> {
        let resp = self
            .http
            .get(self.url("/conversations"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        let resp = ensure_success(resp, None).await?;
        read_json(resp).await
    }

    /// Full history of one conversation, oldest first.
    pub async fn get_messages(
        &self,
        conversation_id: &str,
        limit: Option<u32>,
    ) -> Result<ConversationDetail, ApiError> {
        let mut req = self
            .http
            .get(self.url(&format!("/conversations/{}/messages", conversation_id)));
        if let Some(limit) = limit {
            req = req.query(&[("limit", limit)]);
        }

        let resp = ensure_success(req.send().await?, None).await?;
        let mut detail: ConversationDetail = read_json(resp).await?;

        for message in &mut detail.messages {
            if message.conversation_id.is_none() {
                message.conversation_id = Some(conversation_id.to_string());
            }
        }
        if detail.total == 0 {
            detail.total = detail.messages.len();
        }
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::Role;
    use crate::test_support::serve;
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_get_messages_fills_conversation_id() {
        let router = Router::new().route(
            "/conversations/:id/messages",
            get(
                |Path(id): Path<String>, Query(params): Query<HashMap<String, String>>| async move {
                    assert_eq!(params.get("limit").map(String::as_str), Some("10"));
                    Json(json!({
                        "conversation_id": id,
                        "title": "Ga greetings",
                        "messages": [
                            {"id": "1", "role": "user", "content": "Hello", "created_at": "2025-01-01T08:00:00Z"},
                            {"id": "2", "conversation_id": id, "role": "assistant", "content": "Hɛloo", "created_at": "2025-01-01T08:00:02Z"}
                        ]
                    }))
                },
            ),
        );
        let base = serve(router).await;
        let client = ApiClient::with_base_url(&base);

        let detail = client.get_messages("abc", Some(10)).await.unwrap();
        assert_eq!(detail.title.as_deref(), Some("Ga greetings"));
        assert_eq!(detail.total, 2);
        assert!(detail
            .messages
            .iter()
            .all(|m| m.conversation_id.as_deref() == Some("abc")));
        assert_eq!(detail.messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_list_conversations_page() {
        let router = Router::new().route(
            "/conversations",
            get(|| async {
                Json(json!({
                    "conversations": [{"conversation_id": "abc", "last_message_at": "2025-01-01T08:00:00Z"}],
                    "total": "1 conversations"
                }))
            }),
        );
        let base = serve(router).await;
        let page = ApiClient::with_base_url(&base)
            .list_conversations(20)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.conversations[0].conversation_id, "abc");
        assert!(page.conversations[0].title.is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let router = Router::new().route("/conversations", get(|| async { "not json" }));
        let base = serve(router).await;
        let err = ApiClient::with_base_url(&base)
            .list_conversations(20)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Parse(_)));
    }
}

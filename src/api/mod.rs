pub mod chat;
pub mod conversations;
pub mod upload;

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;

pub use chat::{ChatCompletion, ChatStreamObserver, ChatStreamSession, SessionState};
pub use conversations::ConversationPage;
pub use upload::UploadProgress;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiInfo {
    pub message: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// HTTP client for the Heritage RAG backend. Cheap to clone; all clones share
/// one connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    top_k: Option<u8>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        // No overall request timeout: it would also cut off long answer streams.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            top_k: config.top_k,
        })
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            top_k: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        let resp = self.http.get(self.url("/health")).send().await?;
        let resp = ensure_success(resp, None).await?;
        read_json(resp).await
    }

    pub async fn api_info(&self) -> Result<ApiInfo, ApiError> {
        let resp = self.http.get(self.url("/")).send().await?;
        let resp = ensure_success(resp, None).await?;
        read_json(resp).await
    }
}

/// Turns a non-2xx response into an [`ApiError`]. `not_found_conversation` is
/// set only on the continue-chat path, where a 404 means the id is stale.
pub(crate) async fn ensure_success(
    resp: Response,
    not_found_conversation: Option<&str>,
) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = error_detail(&body)
        .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));

    if status == StatusCode::NOT_FOUND {
        if let Some(conversation_id) = not_found_conversation {
            return Err(ApiError::ConversationNotFound {
                conversation_id: conversation_id.to_string(),
                message,
            });
        }
    }

    Err(ApiError::Http {
        status: status.as_u16(),
        message,
    })
}

pub(crate) async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))
}

/// Extracts a human message from a FastAPI error body: `{"detail": "..."}`,
/// a validation list `{"detail": [{"msg": "..."}]}`, or `{"error": "..."}`.
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let detail = value.get("detail").or_else(|| value.get("error"))?;
    match detail {
        serde_json::Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        serde_json::Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("Conversation not found: {message}")]
    ConversationNotFound {
        conversation_id: String,
        message: String,
    },
    #[error("Stream decode error: {0}")]
    StreamDecode(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Another request is still in progress")]
    Busy,
}

impl ApiError {
    pub fn is_conversation_not_found(&self) -> bool {
        matches!(self, ApiError::ConversationNotFound { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::ConversationNotFound { .. } => Some(StatusCode::NOT_FOUND.as_u16()),
            ApiError::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use serde::{Deserialize, Serialize};

use super::{ensure_success, read_json, ApiClient, ApiError};
use crate::store::models::Message;

/// Response header carrying the canonical conversation id.
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

/// Lifecycle of one chat request. `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Requesting,
    Streaming,
    Accumulating,
    NonStreaming,
    Complete,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub message: Message,
    pub conversation_id: String,
}

impl ChatCompletion {
    fn new(conversation_id: String, content: String) -> Self {
        Self {
            message: Message::assistant(&conversation_id, content),
            conversation_id,
        }
    }
}

/// Receives the incremental output of a [`ChatStreamSession`]. Exactly one of
/// `on_complete` / `on_error` is called per session, after every chunk.
pub trait ChatStreamObserver {
    fn on_chunk(&mut self, chunk: &str);
    fn on_complete(&mut self, completion: &ChatCompletion);
    fn on_error(&mut self, error: &ApiError);
}

#[derive(Serialize)]
struct AskRequest<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct AskResponse {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(alias = "content")]
    response: String,
}

/// One request/response cycle against `/chat/new` or `/chat/{id}`.
pub struct ChatStreamSession<'a> {
    client: &'a ApiClient,
    query: String,
    conversation_id: Option<String>,
    state: SessionState,
}

impl<'a> ChatStreamSession<'a> {
    pub fn new(
        client: &'a ApiClient,
        query: impl Into<String>,
        conversation_id: Option<String>,
    ) -> Result<Self, ApiError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(ApiError::Validation("Query cannot be empty".into()));
        }
        Ok(Self {
            client,
            query,
            conversation_id,
            state: SessionState::Idle,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn endpoint(&self) -> String {
        match &self.conversation_id {
            Some(id) => format!("/chat/{}", id),
            None => "/chat/new".to_string(),
        }
    }

    /// Drives the request to a terminal state, reporting to `observer`, and
    /// returns the same outcome the observer saw.
    pub async fn run<O: ChatStreamObserver>(
        &mut self,
        observer: &mut O,
    ) -> Result<ChatCompletion, ApiError> {
        let outcome = self.drive(observer).await;
        match &outcome {
            Ok(completion) => {
                self.transition(SessionState::Complete);
                tracing::info!(
                    conversation_id = %completion.conversation_id,
                    chars = completion.message.content.len(),
                    "chat response complete"
                );
                observer.on_complete(completion);
            }
            Err(err) => {
                self.transition(SessionState::Failed);
                tracing::warn!(endpoint = %self.endpoint(), "chat request failed: {}", err);
                observer.on_error(err);
            }
        }
        outcome
    }

    async fn drive<O: ChatStreamObserver>(
        &mut self,
        observer: &mut O,
    ) -> Result<ChatCompletion, ApiError> {
        self.transition(SessionState::Requesting);

        let mut req = self
            .client
            .http
            .post(self.client.url(&self.endpoint()))
            .query(&[("stream", "true")]);
        if let Some(top_k) = self.client.top_k {
            req = req.query(&[("top_k", top_k)]);
        }

        let resp = req
            .json(&AskRequest { query: &self.query })
            .send()
            .await?;
        let resp = ensure_success(resp, self.conversation_id.as_deref()).await?;
        let header_id = header_conversation_id(&resp);

        if is_json(&resp) {
            self.transition(SessionState::NonStreaming);
            let body: AskResponse = read_json(resp).await?;
            let conversation_id = self.resolve_conversation_id(header_id, body.conversation_id)?;
            return Ok(ChatCompletion::new(conversation_id, body.response));
        }

        self.transition(SessionState::Streaming);
        let content = drain_text_stream(resp.bytes_stream(), |chunk| observer.on_chunk(chunk)).await?;

        self.transition(SessionState::Accumulating);
        let conversation_id = self.resolve_conversation_id(header_id, None)?;
        Ok(ChatCompletion::new(conversation_id, content))
    }

    // Header wins over body, body over the id we asked for.
    fn resolve_conversation_id(
        &self,
        header: Option<String>,
        body: Option<String>,
    ) -> Result<String, ApiError> {
        header
            .or(body.filter(|id| !id.is_empty()))
            .or_else(|| self.conversation_id.clone())
            .ok_or_else(|| ApiError::Parse("response did not include a conversation id".into()))
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "chat session transition");
        self.state = next;
    }
}

fn header_conversation_id(resp: &Response) -> Option<String> {
    resp.headers()
        .get(CONVERSATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn is_json(resp: &Response) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
}

/// Reads a byte stream to the end as UTF-8 text, handing every decoded
/// fragment to `on_chunk` in arrival order. Returns the concatenated text.
pub async fn drain_text_stream<S, B, E>(
    stream: S,
    mut on_chunk: impl FnMut(&str),
) -> Result<String, ApiError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    ApiError: From<E>,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = Utf8Decoder::default();
    let mut content = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let text = decoder.push(chunk.as_ref())?;
        if !text.is_empty() {
            content.push_str(&text);
            on_chunk(&text);
        }
    }

    decoder.finish()?;
    Ok(content)
}

/// Incremental UTF-8 decoder; holds back a multi-byte sequence split across
/// transport chunks until the rest arrives.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
    offset: usize,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> Result<String, ApiError> {
        self.pending.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(err) => {
                return Err(ApiError::StreamDecode(format!(
                    "invalid UTF-8 at byte {}",
                    self.offset + err.valid_up_to()
                )))
            }
        };

        let decoded: Vec<u8> = self.pending.drain(..valid).collect();
        self.offset += valid;
        String::from_utf8(decoded).map_err(|e| ApiError::StreamDecode(e.to_string()))
    }

    fn finish(self) -> Result<(), ApiError> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(ApiError::StreamDecode(
                "stream ended inside a multi-byte character".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::body::Body;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        chunks: Vec<String>,
        completed: Option<ChatCompletion>,
        errors: Vec<String>,
    }

    impl ChatStreamObserver for Recorder {
        fn on_chunk(&mut self, chunk: &str) {
            self.chunks.push(chunk.to_string());
        }

        fn on_complete(&mut self, completion: &ChatCompletion) {
            self.completed = Some(completion.clone());
        }

        fn on_error(&mut self, error: &ApiError) {
            self.errors.push(error.to_string());
        }
    }

    fn streamed(conversation_id: &str, chunks: Vec<&'static str>) -> AxumResponse {
        let body = futures::stream::iter(chunks).then(|chunk| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, std::io::Error>(chunk)
        });
        AxumResponse::builder()
            .header("content-type", "text/plain; charset=utf-8")
            .header(CONVERSATION_ID_HEADER, conversation_id)
            .body(Body::from_stream(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_drain_preserves_order() {
        let chunks = vec![
            Ok::<_, ApiError>(b"Hi".to_vec()),
            Ok(b" there".to_vec()),
            Ok(b"!".to_vec()),
        ];
        let mut seen = Vec::new();
        let content = drain_text_stream(futures::stream::iter(chunks), |c| seen.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(seen, vec!["Hi", " there", "!"]);
        assert_eq!(content, "Hi there!");
    }

    #[tokio::test]
    async fn test_drain_split_multibyte_character() {
        // "ɛ" is 0xC9 0x9B; split it across two transport chunks.
        let chunks = vec![
            Ok::<_, ApiError>(vec![b't', 0xC9]),
            Ok(vec![0x9B, b'n']),
        ];
        let mut seen = Vec::new();
        let content = drain_text_stream(futures::stream::iter(chunks), |c| seen.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(content, "tɛn");
        assert_eq!(seen, vec!["t", "ɛn"]);
    }

    #[tokio::test]
    async fn test_drain_invalid_utf8() {
        let chunks = vec![Ok::<_, ApiError>(b"ok".to_vec()), Ok(vec![0xFF, 0xFE])];
        let err = drain_text_stream(futures::stream::iter(chunks), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::StreamDecode(_)));
    }

    #[tokio::test]
    async fn test_drain_truncated_character() {
        let chunks = vec![Ok::<_, ApiError>(vec![b'a', 0xE2, 0x82])];
        let err = drain_text_stream(futures::stream::iter(chunks), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::StreamDecode(_)));
    }

    #[tokio::test]
    async fn test_drain_transport_error_stops_stream() {
        let chunks = vec![
            Ok(b"partial".to_vec()),
            Err(ApiError::StreamDecode("connection reset".into())),
        ];
        let mut seen = Vec::new();
        let result = drain_text_stream(futures::stream::iter(chunks), |c| seen.push(c.to_string())).await;
        assert!(result.is_err());
        assert_eq!(seen, vec!["partial"]);
    }

    #[test]
    fn test_empty_query_rejected() {
        let client = ApiClient::with_base_url("http://localhost:1");
        let err = ChatStreamSession::new(&client, "   ", None).err().unwrap();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_endpoint_selection() {
        let client = ApiClient::with_base_url("http://localhost:1");
        let fresh = ChatStreamSession::new(&client, "hello", None).unwrap();
        assert_eq!(fresh.endpoint(), "/chat/new");
        assert_eq!(fresh.state(), SessionState::Idle);

        let continued = ChatStreamSession::new(&client, "hello", Some("abc".into())).unwrap();
        assert_eq!(continued.endpoint(), "/chat/abc");
    }

    #[tokio::test]
    async fn test_streamed_response_completes() {
        let router = Router::new().route(
            "/chat/new",
            post(
                |Query(params): Query<HashMap<String, String>>, Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(params.get("stream").map(String::as_str), Some("true"));
                    assert_eq!(body["query"], "Hello");
                    streamed("abc-123", vec!["Hi", " there"])
                },
            ),
        );
        let base = serve(router).await;
        let client = ApiClient::with_base_url(&base);

        let mut session = ChatStreamSession::new(&client, "Hello", None).unwrap();
        let mut recorder = Recorder::default();
        let completion = session.run(&mut recorder).await.unwrap();

        assert_eq!(session.state(), SessionState::Complete);
        assert_eq!(recorder.chunks.concat(), "Hi there");
        assert_eq!(completion.message.content, "Hi there");
        assert_eq!(completion.conversation_id, "abc-123");
        let seen = recorder.completed.unwrap();
        assert_eq!(seen.message.content, recorder.chunks.concat());
        assert!(recorder.errors.is_empty());
    }

    #[tokio::test]
    async fn test_json_fallback() {
        let router = Router::new().route(
            "/chat/:conversation_id",
            post(|Path(id): Path<String>| async move {
                Json(json!({
                    "conversation_id": id,
                    "response": "Ojekoo means good morning.",
                    "query": "How do I say good morning?"
                }))
            }),
        );
        let base = serve(router).await;
        let client = ApiClient::with_base_url(&base);

        let mut session =
            ChatStreamSession::new(&client, "How do I say good morning?", Some("conv-9".into()))
                .unwrap();
        let mut recorder = Recorder::default();
        let completion = session.run(&mut recorder).await.unwrap();

        assert!(recorder.chunks.is_empty());
        assert_eq!(completion.conversation_id, "conv-9");
        assert_eq!(completion.message.content, "Ojekoo means good morning.");
        assert_eq!(session.state(), SessionState::Complete);
    }

    #[tokio::test]
    async fn test_json_body_id_wins_over_requested_id() {
        let router = Router::new().route(
            "/chat/:conversation_id",
            post(|| async { Json(json!({"conversation_id": "new", "response": "moved"})) }),
        );
        let base = serve(router).await;
        let client = ApiClient::with_base_url(&base);

        let mut session = ChatStreamSession::new(&client, "q", Some("old".into())).unwrap();
        let mut recorder = Recorder::default();
        let completion = session.run(&mut recorder).await.unwrap();

        assert_eq!(completion.conversation_id, "new");
        assert_eq!(recorder.completed.unwrap().conversation_id, "new");
    }

    #[tokio::test]
    async fn test_new_chat_json_uses_body_id() {
        let router = Router::new().route(
            "/chat/new",
            post(|| async { Json(json!({"conversation_id": "fresh-7", "response": "Akwaaba"})) }),
        );
        let base = serve(router).await;
        let client = ApiClient::with_base_url(&base);

        let mut session = ChatStreamSession::new(&client, "q", None).unwrap();
        let completion = session.run(&mut Recorder::default()).await.unwrap();
        assert_eq!(completion.conversation_id, "fresh-7");
        assert_eq!(completion.message.content, "Akwaaba");
        assert_eq!(session.state(), SessionState::Complete);
    }

    #[tokio::test]
    async fn test_header_id_takes_precedence() {
        let router = Router::new().route(
            "/chat/new",
            post(|| async {
                (
                    [(CONVERSATION_ID_HEADER, "from-header")],
                    Json(json!({"conversation_id": "from-body", "response": "ok"})),
                )
            }),
        );
        let base = serve(router).await;
        let client = ApiClient::with_base_url(&base);

        let mut session = ChatStreamSession::new(&client, "q", None).unwrap();
        let completion = session.run(&mut Recorder::default()).await.unwrap();
        assert_eq!(completion.conversation_id, "from-header");
    }

    #[tokio::test]
    async fn test_continue_404_is_conversation_not_found() {
        let router = Router::new().route(
            "/chat/:conversation_id",
            post(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({"detail": "Conversation with ID 'X' not found."})),
                )
            }),
        );
        let base = serve(router).await;
        let client = ApiClient::with_base_url(&base);

        let mut session = ChatStreamSession::new(&client, "q", Some("X".into())).unwrap();
        let mut recorder = Recorder::default();
        let err = session.run(&mut recorder).await.unwrap_err();

        assert!(err.is_conversation_not_found());
        assert_eq!(session.state(), SessionState::Failed);
        assert!(recorder.completed.is_none());
        assert_eq!(recorder.errors.len(), 1);
        assert!(recorder.errors[0].contains("Conversation not found"));
    }

    #[tokio::test]
    async fn test_new_chat_404_is_plain_http_error() {
        let router = Router::new().route(
            "/chat/new",
            post(|| async { StatusCode::NOT_FOUND.into_response() }),
        );
        let base = serve(router).await;
        let client = ApiClient::with_base_url(&base);

        let mut session = ChatStreamSession::new(&client, "q", None).unwrap();
        let err = session.run(&mut Recorder::default()).await.unwrap_err();
        match err {
            ApiError::Http { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Request failed with status 404");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_conversation_id_fails() {
        let router = Router::new().route(
            "/chat/new",
            post(|| async { "answer without a conversation header" }),
        );
        let base = serve(router).await;
        let client = ApiClient::with_base_url(&base);

        let mut session = ChatStreamSession::new(&client, "q", None).unwrap();
        let mut recorder = Recorder::default();
        let err = session.run(&mut recorder).await.unwrap_err();
        assert!(matches!(err, ApiError::Parse(_)));
        assert!(recorder.completed.is_none());
        assert!(!recorder.chunks.is_empty());
    }
}

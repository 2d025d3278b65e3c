use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Prefix of ids minted locally for optimistic messages.
pub const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "you")]
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub conversation_id: Option<String>,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp_or_now")]
    pub created_at: DateTime<Utc>,
    /// Set while the message is a local, not yet confirmed, entry.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

impl Message {
    /// An optimistic user message shown before the backend answers.
    pub fn provisional_user(content: &str, conversation_id: Option<String>) -> Self {
        Self {
            id: format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4()),
            conversation_id,
            role: Role::User,
            content: content.to_string(),
            metadata: None,
            created_at: Utc::now(),
            pending: true,
        }
    }

    pub fn assistant(conversation_id: &str, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: Some(conversation_id.to_string()),
            role: Role::Assistant,
            content,
            metadata: None,
            created_at: Utc::now(),
            pending: false,
        }
    }

    pub fn is_local(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationListItem {
    pub conversation_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConversationListItem {
    pub fn new(conversation_id: impl Into<String>, last_message_at: Option<DateTime<Utc>>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            title: None,
            last_message_at,
        }
    }

    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("New conversation")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConversationDetail {
    pub conversation_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, deserialize_with = "count")]
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UploadResult {
    pub status: String,
    #[serde(alias = "file_name")]
    pub file_path: String,
    #[serde(default, alias = "file_url")]
    pub public_url: Option<String>,
    pub message: String,
    #[serde(default)]
    pub file_size: Option<String>,
    #[serde(default)]
    pub next_step: Option<String>,
}

impl UploadResult {
    /// `exists` means the backend already had the file and kept it.
    pub fn is_success(&self) -> bool {
        matches!(self.status.as_str(), "success" | "exists")
    }
}

/// A completed upload, kept for the current session only.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UploadRecord {
    pub file_path: String,
    pub public_url: Option<String>,
    pub status: String,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&UploadResult> for UploadRecord {
    fn from(result: &UploadResult) -> Self {
        Self {
            file_path: result.file_path.clone(),
            public_url: result.public_url.clone(),
            status: result.status.clone(),
            uploaded_at: Utc::now(),
        }
    }
}

/// Parses the timestamp shapes Postgres/Supabase hand back: RFC 3339, `+00`
/// style offsets, or naive values that are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn timestamp_or_now<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_timestamp(deserializer)?.unwrap_or_else(Utc::now))
}

fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()))
}

/// Accepts `15` as well as the humanized `"15 messages"`.
pub(crate) fn count<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0) as usize,
        serde_json::Value::String(s) => s
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        _ => 0,
    })
}

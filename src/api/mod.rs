//! Wire payloads exchanged with the chat backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One prior turn sent along with a new message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of the streaming chat POST.
///
/// An empty `session_id` asks the backend to open a new conversation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
    pub user_id: String,
    pub think_mode: bool,
    pub file_ids: Vec<String>,
    pub history: Vec<ChatMessage>,
    pub temperature: f64,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            temperature: 0.7,
            ..Default::default()
        }
    }

    pub fn is_new_conversation(&self) -> bool {
        self.session_id.trim().is_empty()
    }
}

#[derive(Deserialize)]
pub struct TokenPayload {
    pub content: String,
}

/// `content` of a `final` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
pub struct FinalPayload {
    #[serde(default)]
    pub content: Option<FinalContent>,
}

#[derive(Deserialize)]
pub struct SourcesPayload {
    pub sources: Vec<Value>,
}

#[derive(Deserialize)]
pub struct EndPayload {
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

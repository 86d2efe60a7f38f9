use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }

    /// Speaker name shown in transcripts.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant => "Assistant",
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// One conversation turn as held by the message store.
///
/// `raw_event` keeps the full assistant payload (citations, metadata) for
/// inspection; it is never written to the persisted snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub raw_event: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            raw_event: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_raw_event(mut self, raw_event: Value) -> Self {
        self.raw_event = Some(raw_event);
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }
}

/// Serialized form used by snapshots and by export/import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub role: Role,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default, rename = "rawEvent", skip_serializing_if = "Option::is_none")]
    pub raw_event: Option<Value>,
}

impl MessageRecord {
    pub fn snapshot_of(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            timestamp: Some(message.created_at.timestamp_millis()),
            raw_event: None,
        }
    }

    pub fn export_of(message: &Message) -> Self {
        Self {
            raw_event: message.raw_event.clone(),
            ..Self::snapshot_of(message)
        }
    }

    /// Build a message from an untrusted record. `content` must already be
    /// sanitized by the caller.
    pub fn into_message(self, content: String) -> Message {
        let created_at = self
            .timestamp
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        Message {
            role: self.role,
            content,
            raw_event: self.raw_event,
            created_at,
        }
    }
}

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::core::config::data::Config;
use crate::core::constants::{
    MAX_CONTENT_LENGTH, MAX_LINE_BYTES, MAX_MESSAGES, PERSIST_FALLBACK_MESSAGES,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_CHAT_ENDPOINT: &str = "api/chat/stream";
pub const DEFAULT_USER_ID: &str = "anonymous";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

impl Config {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn chat_endpoint(&self) -> &str {
        self.chat_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_CHAT_ENDPOINT)
    }

    pub fn user_id(&self) -> &str {
        self.user_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(DEFAULT_USER_ID)
    }

    pub fn think_mode(&self) -> bool {
        self.think_mode.unwrap_or(false)
    }

    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
            .filter(|max| *max > 0)
            .unwrap_or(MAX_MESSAGES)
    }

    pub fn max_content_length(&self) -> usize {
        self.max_content_length
            .filter(|max| *max > 0)
            .unwrap_or(MAX_CONTENT_LENGTH)
    }

    /// Never larger than the window itself.
    pub fn persist_fallback_messages(&self) -> usize {
        self.persist_fallback_messages
            .unwrap_or(PERSIST_FALLBACK_MESSAGES)
            .min(self.max_messages())
    }

    pub fn persistence(&self) -> bool {
        self.persistence.unwrap_or(true)
    }

    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
            .filter(|max| *max > 0)
            .unwrap_or(MAX_LINE_BYTES)
    }

    pub fn storage_quota_bytes(&self) -> Option<usize> {
        self.storage_quota_bytes
    }

    /// Snapshot directory: `data_dir` if set, else the platform data dir.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(|| {
            ProjectDirs::from("org", "palaver", "palaver").map(|dirs| dirs.data_dir().to_path_buf())
        })
    }
}

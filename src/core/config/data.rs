use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User configuration read from `config.toml`.
///
/// Every field is optional; the accessors in `defaults.rs` fill in the
/// built-in values.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Backend origin, e.g. `https://chat.example.org`.
    pub base_url: Option<String>,
    /// Path of the streaming chat endpoint, appended to `base_url`.
    pub chat_endpoint: Option<String>,
    pub user_id: Option<String>,
    pub think_mode: Option<bool>,
    pub temperature: Option<f64>,
    /// Connect and per-read timeout for chat requests.
    pub request_timeout_secs: Option<u64>,
    pub max_messages: Option<usize>,
    pub max_content_length: Option<usize>,
    /// Entries kept when a snapshot write runs into the storage quota.
    pub persist_fallback_messages: Option<usize>,
    /// Mirror the conversation to disk.
    pub persistence: Option<bool>,
    /// Where snapshots live. Defaults to the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub max_line_bytes: Option<usize>,
    /// Largest snapshot the file store accepts, in bytes.
    pub storage_quota_bytes: Option<usize>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
///
/// # Examples
/// - Unix: `/home/user/.config/palaver` → `~/.config/palaver`
/// - macOS: `/Users/user/Library/Application Support/...` → `~/Library/Application Support/...`
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

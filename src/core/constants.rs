//! Shared constants used across the application

/// Sliding-window capacity of the conversation buffer.
pub const MAX_MESSAGES: usize = 100;

/// Number of most recent entries written when a full snapshot hits the storage quota.
pub const PERSIST_FALLBACK_MESSAGES: usize = 50;

/// Maximum stored length of a single message, in characters.
pub const MAX_CONTENT_LENGTH: usize = 50_000;

/// Appended to content cut at [`MAX_CONTENT_LENGTH`].
pub const TRUNCATION_MARKER: &str = "\n\n[message truncated]";

/// Fixed key of the persisted conversation snapshot.
pub const SNAPSHOT_KEY: &str = "palaver.messages";

/// Upper bound on a single undelimited line held by the decoder.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Payload that ends a stream successfully.
pub const DONE_SENTINEL: &str = "[DONE]";

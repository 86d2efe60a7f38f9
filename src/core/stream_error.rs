use thiserror::Error;

/// Terminal failures of a streaming session.
///
/// Only these reach a caller. Malformed frames are skipped inside the
/// assembler and never become a `StreamError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {summary}")]
    Http { status: u16, summary: String },

    /// Connection, timeout, or body read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend sent an explicit `error` frame.
    #[error("{0}")]
    Remote(String),

    /// A single line grew past the decoder limit without a newline.
    #[error("stream line exceeded {limit} bytes without a newline")]
    LineTooLong { limit: usize },

    /// Another reader is still attached to the same conversation.
    #[error("a stream is already active for conversation '{key}'")]
    SessionActive { key: String },

    /// The session task stopped without reporting an outcome.
    #[error("stream task aborted: {0}")]
    Aborted(String),
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StreamError::Transport(format!("request timed out: {err}"))
        } else {
            StreamError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

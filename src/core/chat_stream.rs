use std::collections::HashSet;
use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ChatRequest;
use crate::core::config::data::Config;
use crate::core::constants::MAX_LINE_BYTES;
use crate::core::frames::{
    session_id_from, sources_metadata, EventAssembler, FinalFrame, ProtocolFrame,
};
use crate::core::line_decoder::decode_lines;
use crate::core::stream_error::StreamError;
use crate::utils::url::construct_api_url;

/// Receives the events of one streaming session, in stream order.
///
/// Exactly one of `on_complete`, `on_error` or `on_cancelled` runs per
/// session, once, and nothing runs after it.
pub trait StreamHandler: Send + 'static {
    fn on_token(&mut self, text: &str);

    /// `sources`, `end` metadata, and the non-text half of `final` frames.
    fn on_metadata(&mut self, _metadata: &Value) {}

    fn on_final(&mut self, _frame: &FinalFrame) {}

    fn on_complete(&mut self);

    fn on_error(&mut self, error: &StreamError);

    fn on_cancelled(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// `[DONE]` or a clean end of input. Carries the conversation id when
    /// the backend reported one.
    Completed { session_id: Option<String> },
    Failed(StreamError),
    Cancelled,
}

#[derive(Clone, Debug)]
pub enum StreamMessage {
    Chunk(String),
    Metadata(Value),
    Final(FinalFrame),
    Error(String),
    End,
    Cancelled,
}

/// Forwards session events over a channel tagged with a caller-chosen id.
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
    stream_id: u64,
}

impl ChannelHandler {
    pub fn new(tx: mpsc::UnboundedSender<(StreamMessage, u64)>, stream_id: u64) -> Self {
        Self { tx, stream_id }
    }

    fn send(&self, message: StreamMessage) {
        let _ = self.tx.send((message, self.stream_id));
    }
}

impl StreamHandler for ChannelHandler {
    fn on_token(&mut self, text: &str) {
        self.send(StreamMessage::Chunk(text.to_string()));
    }

    fn on_metadata(&mut self, metadata: &Value) {
        self.send(StreamMessage::Metadata(metadata.clone()));
    }

    fn on_final(&mut self, frame: &FinalFrame) {
        self.send(StreamMessage::Final(frame.clone()));
    }

    fn on_complete(&mut self) {
        self.send(StreamMessage::End);
    }

    fn on_error(&mut self, error: &StreamError) {
        self.send(StreamMessage::Error(error.to_string()));
    }

    fn on_cancelled(&mut self) {
        self.send(StreamMessage::Cancelled);
    }
}

struct Dispatch<H> {
    handler: H,
    finished: bool,
    session_id: Option<String>,
}

impl<H: StreamHandler> Dispatch<H> {
    fn new(handler: H) -> Self {
        Self {
            handler,
            finished: false,
            session_id: None,
        }
    }

    /// Deliver one frame. Returns the outcome when the frame ends the session.
    fn frame(&mut self, frame: ProtocolFrame) -> Option<SessionOutcome> {
        if self.finished {
            return None;
        }
        match frame {
            ProtocolFrame::Token(text) => self.handler.on_token(&text),
            ProtocolFrame::Final(frame) => {
                if let Some(id) = frame.session_id() {
                    self.session_id = Some(id.to_string());
                }
                self.handler.on_final(&frame);
                if let Some(metadata) = frame.metadata_value() {
                    self.handler.on_metadata(&metadata);
                }
            }
            ProtocolFrame::Sources(sources) => {
                self.handler.on_metadata(&sources_metadata(&sources));
            }
            ProtocolFrame::Metadata(metadata) => {
                if let Some(id) = session_id_from(&metadata) {
                    self.session_id = Some(id.to_string());
                }
                self.handler.on_metadata(&Value::Object(metadata));
            }
            ProtocolFrame::Error(message) => {
                return Some(SessionOutcome::Failed(StreamError::Remote(message)));
            }
            ProtocolFrame::Done => {
                return Some(SessionOutcome::Completed {
                    session_id: self.session_id.clone(),
                });
            }
        }
        None
    }

    fn finish(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        if self.finished {
            return outcome;
        }
        self.finished = true;
        match &outcome {
            SessionOutcome::Completed { .. } => self.handler.on_complete(),
            SessionOutcome::Failed(err) => self.handler.on_error(err),
            SessionOutcome::Cancelled => self.handler.on_cancelled(),
        }
        outcome
    }
}

fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .or_else(|| value.get("detail"))
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value) {
            if !summary.is_empty() {
                return summary;
            }
        }
        return json_value.to_string();
    }

    trimmed.to_string()
}

/// Releases the conversation slot when the session task ends.
struct ActiveSession {
    key: String,
    registry: Arc<Mutex<HashSet<String>>>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Handle to a running session.
pub struct CancelHandle {
    token: CancellationToken,
    task: JoinHandle<SessionOutcome>,
}

impl CancelHandle {
    /// Stop reading and drop the connection. The handler receives
    /// `on_cancelled` unless the session already ended.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the terminal callback to run and return the outcome.
    pub async fn wait(self) -> SessionOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => SessionOutcome::Failed(StreamError::Aborted(err.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct ChatStreamService {
    client: reqwest::Client,
    chat_url: String,
    max_line_bytes: usize,
    active: Arc<Mutex<HashSet<String>>>,
}

impl ChatStreamService {
    pub fn new(client: reqwest::Client, base_url: &str, endpoint: &str) -> Self {
        Self {
            client,
            chat_url: construct_api_url(base_url, endpoint),
            max_line_bytes: MAX_LINE_BYTES,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, StreamError> {
        let timeout = Duration::from_secs(config.request_timeout_secs());
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self::new(client, config.base_url(), config.chat_endpoint())
            .with_max_line_bytes(config.max_line_bytes()))
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    /// Whether a reader is attached to the conversation of `request`.
    pub fn is_active(&self, request: &ChatRequest) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&session_key(request))
    }

    /// Send `request` and stream its response into `handler` on a new task.
    ///
    /// Fails immediately, without contacting the backend, when the same
    /// conversation already has an active session.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since the session runs on
    /// a spawned task.
    pub fn start<H: StreamHandler>(
        &self,
        request: ChatRequest,
        handler: H,
    ) -> Result<CancelHandle, StreamError> {
        let key = session_key(&request);
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if !active.insert(key.clone()) {
                debug!(session = %key, "Rejecting second stream for active conversation");
                return Err(StreamError::SessionActive { key });
            }
        }
        let slot = ActiveSession {
            key,
            registry: Arc::clone(&self.active),
        };

        let token = CancellationToken::new();
        let task = tokio::spawn(run_session(
            self.client.clone(),
            self.chat_url.clone(),
            request,
            self.max_line_bytes,
            token.clone(),
            Dispatch::new(handler),
            slot,
        ));

        Ok(CancelHandle { token, task })
    }
}

fn session_key(request: &ChatRequest) -> String {
    if request.is_new_conversation() {
        format!("new:{}", request.user_id)
    } else {
        request.session_id.clone()
    }
}

async fn run_session<H: StreamHandler>(
    client: reqwest::Client,
    chat_url: String,
    request: ChatRequest,
    max_line_bytes: usize,
    cancel_token: CancellationToken,
    mut dispatch: Dispatch<H>,
    _slot: ActiveSession,
) -> SessionOutcome {
    let outcome = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => SessionOutcome::Cancelled,
        outcome = drive(&client, &chat_url, &request, max_line_bytes, &mut dispatch) => outcome,
    };

    match &outcome {
        SessionOutcome::Completed { .. } => debug!(url = %chat_url, "Stream completed"),
        SessionOutcome::Failed(err) => warn!(url = %chat_url, error = %err, "Stream failed"),
        SessionOutcome::Cancelled => debug!(url = %chat_url, "Stream cancelled"),
    }
    dispatch.finish(outcome)
}

async fn drive<H: StreamHandler>(
    client: &reqwest::Client,
    chat_url: &str,
    request: &ChatRequest,
    max_line_bytes: usize,
    dispatch: &mut Dispatch<H>,
) -> SessionOutcome {
    let response = match client
        .post(chat_url)
        .header("Content-Type", "application/json")
        .header("Accept", "text/event-stream")
        .json(request)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => return SessionOutcome::Failed(err.into()),
    };

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        return SessionOutcome::Failed(StreamError::Http {
            status: status.as_u16(),
            summary: summarize_error_body(&error_text),
        });
    }

    let mut lines = pin!(decode_lines(Box::pin(response.bytes_stream()), max_line_bytes));
    let mut assembler = EventAssembler::new();

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => return SessionOutcome::Failed(err),
        };
        let Some(frame) = assembler.push_line(&line) else {
            continue;
        };
        if let Some(outcome) = dispatch.frame(frame) {
            return outcome;
        }
    }

    SessionOutcome::Completed {
        session_id: dispatch.session_id.clone(),
    }
}

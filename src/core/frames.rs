//! Classification of decoded stream lines into protocol frames.
//!
//! Nothing in here touches the network: lines go in, frames come out. Blank
//! lines, `:` comments, lines without the `data:` marker, unknown frame types
//! and malformed JSON all produce no frame. Only malformed JSON is worth a
//! warning; the rest is normal traffic.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::api::{
    EndPayload, ErrorPayload, FinalContent, FinalPayload, SourcesPayload, TokenPayload,
};
use crate::core::constants::DONE_SENTINEL;

pub type FinalFrame = FinalContent;

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolFrame {
    Token(String),
    Final(FinalFrame),
    Sources(Vec<Value>),
    Metadata(Map<String, Value>),
    Error(String),
    Done,
}

impl FinalContent {
    /// Conversation id assigned by the backend, when it reports one.
    pub fn session_id(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(session_id_from)
    }

    /// The non-text half of a final frame, if it carries any.
    pub fn metadata_value(&self) -> Option<Value> {
        if self.sources.is_none() && self.metadata.is_none() {
            return None;
        }
        let mut object = Map::new();
        if let Some(sources) = &self.sources {
            object.insert("sources".into(), Value::Array(sources.clone()));
        }
        if let Some(metadata) = &self.metadata {
            object.insert("metadata".into(), Value::Object(metadata.clone()));
        }
        Some(Value::Object(object))
    }
}

pub fn session_id_from(metadata: &Map<String, Value>) -> Option<&str> {
    metadata
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

fn decode_payload<T: DeserializeOwned>(kind: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(frame_type = kind, error = %err, "Skipping malformed stream frame");
            None
        }
    }
}

/// Classify one decoded line.
pub fn parse_line(line: &str) -> Option<ProtocolFrame> {
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = extract_data_payload(line)?;
    if payload == DONE_SENTINEL {
        return Some(ProtocolFrame::Done);
    }
    if payload.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(Value::Object(object)) => Value::Object(object),
        Ok(other) => {
            warn!(payload = %other, "Skipping stream frame that is not a JSON object");
            return None;
        }
        Err(err) => {
            warn!(error = %err, "Skipping stream frame with malformed JSON");
            return None;
        }
    };

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => {
            debug!("Ignoring stream frame without a type");
            return None;
        }
    };

    match kind.as_str() {
        "token" => decode_payload::<TokenPayload>(&kind, value)
            .map(|payload| ProtocolFrame::Token(payload.content)),
        "final" => decode_payload::<FinalPayload>(&kind, value)
            .map(|payload| ProtocolFrame::Final(payload.content.unwrap_or_default())),
        "sources" => decode_payload::<SourcesPayload>(&kind, value)
            .map(|payload| ProtocolFrame::Sources(payload.sources)),
        "end" => decode_payload::<EndPayload>(&kind, value)
            .map(|payload| ProtocolFrame::Metadata(payload.metadata)),
        "error" => decode_payload::<ErrorPayload>(&kind, value).map(|payload| {
            let message = [payload.content, payload.message]
                .into_iter()
                .flatten()
                .find(|text| !text.trim().is_empty())
                .unwrap_or_else(|| "unknown stream error".to_string());
            ProtocolFrame::Error(message)
        }),
        other => {
            debug!(frame_type = other, "Ignoring unknown stream frame type");
            None
        }
    }
}

/// Stateful line-to-frame assembler for one session.
///
/// After `Done` every further line is ignored.
#[derive(Debug, Default)]
pub struct EventAssembler {
    done: bool,
}

impl EventAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Option<ProtocolFrame> {
        if self.done {
            return None;
        }
        let frame = parse_line(line)?;
        if frame == ProtocolFrame::Done {
            self.done = true;
        }
        Some(frame)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Lazily assemble frames from a sequence of lines, stopping after `Done`.
pub fn assemble<I>(lines: I) -> impl Iterator<Item = ProtocolFrame>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut assembler = EventAssembler::new();
    lines
        .into_iter()
        .map_while(move |line| {
            if assembler.is_done() {
                None
            } else {
                Some(assembler.push_line(line.as_ref()))
            }
        })
        .flatten()
}

/// Metadata object carried by a `sources` frame.
pub fn sources_metadata(sources: &[Value]) -> Value {
    json!({ "sources": sources })
}

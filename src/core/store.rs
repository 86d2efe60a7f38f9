//! Bounded, sanitizing conversation buffer with optional snapshot mirroring.
//!
//! Every entry path (user input, assistant payloads, streamed updates,
//! snapshot loads, imports) runs content through [`sanitize_message`], so the
//! buffer never holds script or frame elements or inline event handlers, and
//! never holds more than `max_messages` entries.
//!
//! Streamed tokens collect in a pending buffer outside the message list and
//! are sanitized once, when the turn is committed, so the stored text does not
//! depend on how the response was split into tokens.
//!
//! Persistence is best-effort. A write that runs into the storage quota is
//! retried once with only the most recent entries; if that fails too the write
//! is skipped. The in-memory buffer is authoritative either way.

use std::collections::VecDeque;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::ChatMessage;
use crate::core::config::data::Config;
use crate::core::constants::{
    MAX_CONTENT_LENGTH, MAX_MESSAGES, PERSIST_FALLBACK_MESSAGES, SNAPSHOT_KEY, TRUNCATION_MARKER,
};
use crate::core::message::{Message, MessageRecord};
use crate::core::sanitize::sanitize_message;
use crate::core::snapshot::{SnapshotStore, StorageError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("import document is not a JSON array: {0}")]
    InvalidDocument(String),

    #[error("failed to serialize messages: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_messages: usize,
    pub max_content_length: usize,
    pub persist_fallback: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_messages: MAX_MESSAGES,
            max_content_length: MAX_CONTENT_LENGTH,
            persist_fallback: PERSIST_FALLBACK_MESSAGES,
        }
    }
}

impl From<&Config> for StoreLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_messages: config.max_messages(),
            max_content_length: config.max_content_length(),
            persist_fallback: config.persist_fallback_messages(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

pub struct MessageStore {
    messages: VecDeque<Message>,
    limits: StoreLimits,
    storage: Option<Box<dyn SnapshotStore>>,
    persistence_enabled: bool,
    /// Raw text of the assistant turn currently streaming in.
    pending: Option<String>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

impl MessageStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            messages: VecDeque::new(),
            limits,
            storage: None,
            persistence_enabled: false,
            pending: None,
        }
    }

    /// Attach durable storage. Mirroring stays off until
    /// [`enable_persistence`](Self::enable_persistence) is called.
    pub fn with_storage(limits: StoreLimits, storage: Box<dyn SnapshotStore>) -> Self {
        Self {
            storage: Some(storage),
            ..Self::new(limits)
        }
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub fn messages(&self) -> &VecDeque<Message> {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn is_persistence_enabled(&self) -> bool {
        self.persistence_enabled
    }

    /// Prior turns in request form, leaving out empty assistant placeholders.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|message| !(message.is_assistant() && message.content.is_empty()))
            .map(|message| ChatMessage {
                role: message.role.as_str().to_string(),
                content: message.content.clone(),
            })
            .collect()
    }

    fn clean(&self, text: &str) -> String {
        sanitize_message(text, self.limits.max_content_length)
    }

    fn push(&mut self, message: Message) {
        self.pending = None;
        self.messages.push_back(message);
        while self.messages.len() > self.limits.max_messages {
            self.messages.pop_front();
        }
    }

    /// Append a user turn. Returns `false` (and stores nothing) for missing or
    /// blank text.
    pub fn add_user_message<'a>(&mut self, text: impl Into<Option<&'a str>>) -> bool {
        let Some(text) = text.into().filter(|text| !text.trim().is_empty()) else {
            debug!("Ignoring empty user message");
            return false;
        };

        let content = self.clean(text);
        self.push(Message::user(content));
        self.persist();
        true
    }

    /// Append an assistant turn from a backend payload carrying a `response`
    /// string. The whole payload is kept in `raw_event`.
    pub fn add_assistant_message(&mut self, payload: &Value) -> bool {
        let Some(response) = payload.get("response").and_then(Value::as_str) else {
            debug!("Ignoring assistant payload without a response field");
            return false;
        };

        let content = self.clean(response);
        self.push(Message::assistant(content).with_raw_event(payload.clone()));
        self.persist();
        true
    }

    /// Open an empty trailing assistant entry for a response that is about to
    /// stream in.
    pub fn begin_assistant_message(&mut self) {
        self.push(Message::assistant(String::new()));
        self.pending = Some(String::new());
    }

    /// Replace the streaming assistant entry's content. No-op unless the
    /// trailing entry is an assistant message. Any pending streamed text is
    /// superseded.
    pub fn update_last_assistant_message(&mut self, text: &str) -> bool {
        let content = self.clean(text);
        let Some(last) = self.messages.back_mut().filter(|m| m.is_assistant()) else {
            debug!("No trailing assistant message to update");
            return false;
        };
        last.content = content;
        self.pending = None;
        self.persist();
        true
    }

    /// Buffer one streamed token for the open assistant entry.
    ///
    /// The entry's content is untouched until
    /// [`finish_assistant_message`](Self::finish_assistant_message). Tokens
    /// past a bound the sanitized content could never exceed are dropped.
    pub fn append_to_last_assistant(&mut self, token: &str) -> bool {
        let bound = self.pending_bound();
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };
        if pending.len() >= bound {
            return false;
        }
        pending.push_str(token);
        true
    }

    /// Commit the streamed text to the open assistant entry, sanitized once.
    ///
    /// Returns `false` when nothing was streaming or no token arrived.
    pub fn finish_assistant_message(&mut self) -> bool {
        match self.pending.take() {
            Some(raw) if !raw.is_empty() => self.update_last_assistant_message(&raw),
            _ => false,
        }
    }

    // A char is at most four bytes; stripped markup may account for the rest.
    fn pending_bound(&self) -> usize {
        self.limits
            .max_content_length
            .saturating_mul(4)
            .saturating_add(TRUNCATION_MARKER.len())
    }

    pub fn clear_messages(&mut self) {
        self.pending = None;
        self.messages.clear();
        if let Some(storage) = self.storage.as_mut() {
            if let Err(err) = storage.remove(SNAPSHOT_KEY) {
                warn!(error = %err, "Failed to remove conversation snapshot");
            }
        }
    }

    /// Turn snapshot mirroring on or off.
    ///
    /// Switching it on loads an existing snapshot, which replaces the buffer.
    /// Without a snapshot, a non-empty buffer is written out instead. Enabling
    /// while already enabled changes nothing.
    pub fn enable_persistence(&mut self, enabled: bool) {
        if !enabled {
            self.persistence_enabled = false;
            return;
        }
        if self.persistence_enabled {
            return;
        }
        if self.storage.is_none() {
            warn!("Persistence requested but no snapshot storage is attached");
            return;
        }

        self.persistence_enabled = true;
        match self.load_snapshot() {
            Some(loaded) => {
                info!(count = loaded.len(), "Restored conversation snapshot");
                self.pending = None;
                self.messages = loaded;
            }
            None if !self.messages.is_empty() => self.persist(),
            None => {}
        }
    }

    fn load_snapshot(&self) -> Option<VecDeque<Message>> {
        let storage = self.storage.as_ref()?;
        let raw = match storage.get(SNAPSHOT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "Failed to read conversation snapshot");
                return None;
            }
        };

        match self.decode_records(&raw) {
            Ok((mut messages, summary)) => {
                if summary.skipped > 0 {
                    warn!(skipped = summary.skipped, "Discarded invalid snapshot records");
                }
                for message in messages.iter_mut() {
                    // Snapshots never carry raw events.
                    message.raw_event = None;
                }
                Some(messages)
            }
            Err(err) => {
                warn!(error = %err, "Ignoring unreadable conversation snapshot");
                None
            }
        }
    }

    /// Validate and sanitize records one by one, keeping the newest
    /// `max_messages` that pass.
    fn decode_records(&self, raw: &str) -> Result<(VecDeque<Message>, ImportSummary), StoreError> {
        let values: Vec<Value> = match serde_json::from_str(raw) {
            Ok(Value::Array(values)) => values,
            Ok(other) => {
                return Err(StoreError::InvalidDocument(format!(
                    "found {}",
                    json_kind(&other)
                )))
            }
            Err(err) => return Err(StoreError::InvalidDocument(err.to_string())),
        };

        let mut summary = ImportSummary::default();
        let mut messages = VecDeque::new();
        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<MessageRecord>(value) {
                Ok(record) => {
                    let content = self.clean(&record.content);
                    messages.push_back(record.into_message(content));
                    summary.imported += 1;
                }
                Err(err) => {
                    debug!(index, error = %err, "Skipping invalid message record");
                    summary.skipped += 1;
                }
            }
        }
        while messages.len() > self.limits.max_messages {
            messages.pop_front();
        }
        Ok((messages, summary))
    }

    pub fn export_messages(&self) -> Result<String, StoreError> {
        let records: Vec<MessageRecord> =
            self.messages.iter().map(MessageRecord::export_of).collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// Replace the buffer with the records in `json`. Malformed records are
    /// dropped individually; only a document that is not an array fails.
    pub fn import_messages(&mut self, json: &str) -> Result<ImportSummary, StoreError> {
        let (messages, summary) = self.decode_records(json)?;
        info!(
            imported = summary.imported,
            skipped = summary.skipped,
            "Imported conversation"
        );
        self.pending = None;
        self.messages = messages;
        self.persist();
        Ok(summary)
    }

    fn persist(&mut self) {
        if !self.persistence_enabled {
            return;
        }
        let fallback = self.limits.persist_fallback;
        let records: Vec<MessageRecord> = self
            .messages
            .iter()
            .map(MessageRecord::snapshot_of)
            .collect();
        let Some(storage) = self.storage.as_mut() else {
            return;
        };

        match write_snapshot(storage.as_mut(), &records) {
            Ok(()) => {}
            Err(err) if err.is_quota_exceeded() => {
                warn!(
                    error = %err,
                    keep = fallback,
                    "Snapshot exceeded storage quota; retrying with recent messages"
                );
                if let Err(err) = storage.remove(SNAPSHOT_KEY) {
                    debug!(error = %err, "Failed to clear snapshot before retry");
                }
                let start = records.len().saturating_sub(fallback);
                if let Err(err) = write_snapshot(storage.as_mut(), &records[start..]) {
                    debug!(error = %err, "Skipping snapshot write");
                }
            }
            Err(err) => warn!(error = %err, "Failed to persist conversation snapshot"),
        }
    }
}

fn write_snapshot(
    storage: &mut dyn SnapshotStore,
    records: &[MessageRecord],
) -> Result<(), StorageError> {
    let payload = serde_json::to_string(records)?;
    storage.set(SNAPSHOT_KEY, &payload)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;
    use crate::core::snapshot::MemorySnapshotStore;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FlakyState {
        value: Option<String>,
        set_calls: usize,
        removes: usize,
        fail_on: Vec<usize>,
    }

    /// Fails the listed `set` calls (1-based) with a quota error.
    #[derive(Clone, Default)]
    struct FlakyStore {
        state: Arc<Mutex<FlakyState>>,
    }

    impl FlakyStore {
        fn failing_on(calls: &[usize]) -> Self {
            let store = Self::default();
            store.state.lock().unwrap().fail_on = calls.to_vec();
            store
        }

        fn stored_records(&self) -> Vec<Value> {
            let state = self.state.lock().unwrap();
            state
                .value
                .as_deref()
                .map(|raw| serde_json::from_str(raw).unwrap())
                .unwrap_or_default()
        }
    }

    impl SnapshotStore for FlakyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(self.state.lock().unwrap().value.clone())
        }

        fn set(&mut self, _key: &str, value: &str) -> Result<(), StorageError> {
            let mut state = self.state.lock().unwrap();
            state.set_calls += 1;
            if state.fail_on.contains(&state.set_calls) {
                return Err(StorageError::QuotaExceeded {
                    needed: value.len(),
                    quota: 0,
                });
            }
            state.value = Some(value.to_string());
            Ok(())
        }

        fn remove(&mut self, _key: &str) -> Result<(), StorageError> {
            let mut state = self.state.lock().unwrap();
            state.removes += 1;
            state.value = None;
            Ok(())
        }
    }

    fn persisted_store(storage: impl SnapshotStore + 'static) -> MessageStore {
        let mut store = MessageStore::with_storage(StoreLimits::default(), Box::new(storage));
        store.enable_persistence(true);
        store
    }

    #[test]
    fn empty_and_missing_input_is_a_no_op() {
        let mut store = MessageStore::default();
        assert!(!store.add_user_message(""));
        assert!(!store.add_user_message("   \n\t"));
        assert!(!store.add_user_message(None));
        assert!(!store.add_assistant_message(&Value::Null));
        assert!(!store.add_assistant_message(&json!({"content": "no response"})));
        assert!(!store.add_assistant_message(&json!({"response": 42})));
        assert!(store.is_empty());
    }

    #[test]
    fn window_keeps_the_most_recent_hundred_in_order() {
        let mut store = MessageStore::default();
        for i in 0..150 {
            assert!(store.add_user_message(format!("message {i}").as_str()));
            assert!(store.len() <= MAX_MESSAGES);
        }
        assert_eq!(store.len(), 100);
        let contents: Vec<&str> = store.messages().iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (50..150).map(|i| format!("message {i}")).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn window_holds_across_mixed_operations() {
        let limits = StoreLimits {
            max_messages: 5,
            ..StoreLimits::default()
        };
        let mut store = MessageStore::new(limits);
        for i in 0..20 {
            match i % 4 {
                0 => {
                    store.add_user_message(format!("u{i}").as_str());
                }
                1 => {
                    store.add_assistant_message(&json!({"response": format!("a{i}")}));
                }
                2 => store.begin_assistant_message(),
                _ => {
                    store.append_to_last_assistant("tok");
                }
            }
            assert!(store.len() <= 5);
        }
        let exported = store.export_messages().unwrap();
        store.import_messages(&exported).unwrap();
        assert!(store.len() <= 5);
    }

    #[test]
    fn assistant_payload_is_kept_as_raw_event() {
        let mut store = MessageStore::default();
        let payload = json!({"response": "Hi", "sources": [{"title": "doc"}]});
        assert!(store.add_assistant_message(&payload));
        let last = store.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Hi");
        assert_eq!(last.raw_event.as_ref(), Some(&payload));
    }

    #[test]
    fn hostile_markup_never_survives_any_entry_path() {
        let hostile = "hi<script>alert(1)</script><img src=x onerror=alert(2)>";
        let mut store = MessageStore::default();

        store.add_user_message(hostile);
        store.add_assistant_message(&json!({ "response": hostile }));
        store.begin_assistant_message();
        store.update_last_assistant_message(hostile);
        store.begin_assistant_message();
        for piece in ["hi<scr", "ipt>alert(1)</scr", "ipt><img src=x one", "rror=alert(2)>"] {
            store.append_to_last_assistant(piece);
        }
        assert!(store.finish_assistant_message());
        let imported = json!([{ "role": "user", "content": hostile }]).to_string();
        let mut other = MessageStore::default();
        other.import_messages(&imported).unwrap();

        for message in store.messages().iter().chain(other.messages().iter()) {
            assert!(!message.content.contains("<script>"), "{}", message.content);
            assert!(!message.content.contains("onerror="), "{}", message.content);
        }
    }

    #[test]
    fn oversized_content_is_truncated_with_marker() {
        let limits = StoreLimits {
            max_content_length: 40,
            ..StoreLimits::default()
        };
        let mut store = MessageStore::new(limits);
        store.add_user_message("x".repeat(500).as_str());
        let content = &store.last().unwrap().content;
        assert!(content.chars().count() <= 40);
        assert!(content.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn streaming_updates_only_touch_trailing_assistant() {
        let mut store = MessageStore::default();
        assert!(!store.update_last_assistant_message("nothing yet"));

        store.add_user_message("question");
        assert!(!store.update_last_assistant_message("wrong target"));
        assert!(!store.append_to_last_assistant("wrong target"));
        assert_eq!(store.last().unwrap().content, "question");

        store.begin_assistant_message();
        assert!(store.append_to_last_assistant("Hel"));
        assert!(store.append_to_last_assistant("lo"));
        assert_eq!(store.last().unwrap().content, "");
        assert!(store.finish_assistant_message());
        assert_eq!(store.last().unwrap().content, "Hello");
        assert!(!store.append_to_last_assistant("late"));
        assert!(store.update_last_assistant_message("Hello there"));
        assert_eq!(store.last().unwrap().content, "Hello there");
        assert_eq!(store.len(), 2);

        store.add_user_message("next");
        assert!(!store.update_last_assistant_message("rewrite history"));
        assert_eq!(store.messages()[1].content, "Hello there");
    }

    #[test]
    fn streamed_text_matches_whole_text_regardless_of_split() {
        let text = "Set the flag with onclick= then call f().";
        let mut whole = MessageStore::default();
        whole.add_assistant_message(&json!({ "response": text }));

        let mut streamed = MessageStore::default();
        streamed.begin_assistant_message();
        for piece in ["Set the flag with on", "click=", " then", " call f()."] {
            assert!(streamed.append_to_last_assistant(piece));
        }
        assert!(streamed.finish_assistant_message());

        assert_eq!(streamed.last().unwrap().content, whole.last().unwrap().content);
        assert!(!streamed.last().unwrap().content.contains("onclick"));
    }

    #[test]
    fn oversized_stream_is_bounded_and_truncated_on_commit() {
        let limits = StoreLimits {
            max_content_length: 40,
            ..StoreLimits::default()
        };
        let mut store = MessageStore::new(limits);
        store.begin_assistant_message();
        let accepted = (0..1_000)
            .take_while(|_| store.append_to_last_assistant("xxxxx"))
            .count();
        assert!(accepted < 1_000);

        assert!(store.finish_assistant_message());
        let content = &store.last().unwrap().content;
        assert!(content.chars().count() <= 40);
        assert!(content.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn tokens_are_mirrored_only_when_the_turn_is_committed() {
        let storage = FlakyStore::default();
        let mut store = persisted_store(storage.clone());
        store.add_user_message("q");
        store.begin_assistant_message();
        store.append_to_last_assistant("an");
        store.append_to_last_assistant("swer");
        assert_eq!(storage.state.lock().unwrap().set_calls, 1);

        store.finish_assistant_message();
        assert_eq!(storage.state.lock().unwrap().set_calls, 2);
        assert_eq!(storage.stored_records()[1]["content"], "answer");
    }

    #[test]
    fn final_text_supersedes_pending_tokens() {
        let mut store = MessageStore::default();
        store.begin_assistant_message();
        store.append_to_last_assistant("partial");
        assert!(store.update_last_assistant_message("complete"));
        assert!(!store.finish_assistant_message());
        assert_eq!(store.last().unwrap().content, "complete");
    }

    #[test]
    fn history_skips_empty_placeholder() {
        let mut store = MessageStore::default();
        store.add_user_message("q");
        store.begin_assistant_message();
        assert_eq!(
            store.history(),
            vec![ChatMessage {
                role: "user".into(),
                content: "q".into()
            }]
        );
    }

    #[test]
    fn export_then_import_reproduces_the_buffer() {
        let mut store = MessageStore::default();
        store.add_user_message("one");
        store.add_assistant_message(&json!({"response": "two", "metadata": {"k": 1}}));
        store.add_user_message("three");

        let exported = store.export_messages().unwrap();
        let mut restored = MessageStore::default();
        let summary = restored.import_messages(&exported).unwrap();

        assert_eq!(summary, ImportSummary { imported: 3, skipped: 0 });
        let pairs = |s: &MessageStore| -> Vec<(Role, String)> {
            s.messages()
                .iter()
                .map(|m| (m.role, m.content.clone()))
                .collect()
        };
        assert_eq!(pairs(&restored), pairs(&store));
        assert_eq!(
            restored.messages()[1].raw_event,
            Some(json!({"response": "two", "metadata": {"k": 1}}))
        );
    }

    #[test]
    fn import_drops_bad_records_individually() {
        let document = json!([
            {"role": "user", "content": "kept"},
            {"role": "system", "content": "bad role"},
            {"role": "assistant"},
            "not an object",
            {"role": "assistant", "content": "also kept", "timestamp": 1_700_000_000_000i64}
        ])
        .to_string();

        let mut store = MessageStore::default();
        let summary = store.import_messages(&document).unwrap();
        assert_eq!(summary, ImportSummary { imported: 2, skipped: 3 });
        assert_eq!(store.messages()[0].content, "kept");
        assert_eq!(
            store.messages()[1].created_at.timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[test]
    fn import_rejects_non_array_document_and_keeps_buffer() {
        let mut store = MessageStore::default();
        store.add_user_message("keep me");
        assert!(matches!(
            store.import_messages(r#"{"role":"user"}"#),
            Err(StoreError::InvalidDocument(_))
        ));
        assert!(store.import_messages("not json").is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn persisted_snapshot_excludes_raw_event_and_is_capped() {
        let storage = FlakyStore::default();
        let mut store = persisted_store(storage.clone());
        store.add_user_message("hello");
        store.add_assistant_message(&json!({"response": "hi", "secret": "big"}));

        let records = storage.stored_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["role"], "assistant");
        assert_eq!(records[1]["content"], "hi");
        assert!(records[1]["timestamp"].is_i64());
        assert!(records[1].get("rawEvent").is_none());

        for i in 0..120 {
            store.add_user_message(format!("m{i}").as_str());
        }
        assert_eq!(storage.stored_records().len(), MAX_MESSAGES);
    }

    #[test]
    fn quota_failure_retries_with_recent_fifty() {
        let storage = FlakyStore::failing_on(&[101]);
        let mut store = persisted_store(storage.clone());

        for i in 0..101 {
            store.add_user_message(format!("m{i}").as_str());
        }

        assert_eq!(store.len(), 100);
        let state = storage.state.lock().unwrap();
        assert_eq!(state.removes, 1);
        assert_eq!(state.set_calls, 102);
        drop(state);

        let records = storage.stored_records();
        assert_eq!(records.len(), PERSIST_FALLBACK_MESSAGES);
        assert_eq!(records[0]["content"], "m51");
        assert_eq!(records[49]["content"], "m100");
    }

    #[test]
    fn failed_retry_is_skipped_silently() {
        let storage = FlakyStore::failing_on(&[2, 3]);
        let mut store = persisted_store(storage.clone());
        store.add_user_message("first");
        store.add_user_message("second");

        assert_eq!(store.len(), 2);
        assert_eq!(storage.stored_records().len(), 0);

        store.add_user_message("third");
        assert_eq!(storage.stored_records().len(), 3);
    }

    #[test]
    fn enabling_persistence_restores_and_resanitizes_snapshot() {
        let mut backing = MemorySnapshotStore::new();
        backing
            .set(
                SNAPSHOT_KEY,
                &json!([
                    {"role": "user", "content": "<script>x()</script>question", "timestamp": 1},
                    {"role": "hacker", "content": "nope", "timestamp": 2},
                    {"role": "assistant", "content": "answer", "timestamp": 3}
                ])
                .to_string(),
            )
            .unwrap();

        let mut store = MessageStore::with_storage(StoreLimits::default(), Box::new(backing));
        store.add_user_message("in memory only");
        assert!(!store.is_persistence_enabled());

        store.enable_persistence(true);
        assert!(store.is_persistence_enabled());
        let contents: Vec<&str> = store.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question", "answer"]);
    }

    #[test]
    fn enabling_without_snapshot_writes_current_buffer() {
        let storage = FlakyStore::default();
        let mut store =
            MessageStore::with_storage(StoreLimits::default(), Box::new(storage.clone()));
        store.add_user_message("before enable");
        assert!(storage.stored_records().is_empty());

        store.enable_persistence(true);
        assert_eq!(storage.stored_records().len(), 1);

        store.enable_persistence(false);
        store.add_user_message("not mirrored");
        assert_eq!(storage.stored_records().len(), 1);
    }

    #[test]
    fn enabling_again_keeps_the_live_buffer() {
        let storage = FlakyStore::failing_on(&[100]);
        let mut store = persisted_store(storage.clone());
        for i in 0..99 {
            store.add_user_message(format!("m{i}").as_str());
        }
        let payload = json!({"response": "cited", "sources": [{"title": "doc"}]});
        store.add_assistant_message(&payload);
        assert_eq!(storage.stored_records().len(), PERSIST_FALLBACK_MESSAGES);

        store.enable_persistence(true);

        assert_eq!(store.len(), 100);
        assert_eq!(store.messages()[0].content, "m0");
        assert_eq!(store.last().unwrap().raw_event.as_ref(), Some(&payload));
    }

    #[test]
    fn enabling_without_storage_stays_off() {
        let mut store = MessageStore::default();
        store.enable_persistence(true);
        assert!(!store.is_persistence_enabled());
    }

    #[test]
    fn corrupt_snapshot_is_ignored() {
        let mut backing = MemorySnapshotStore::new();
        backing.set(SNAPSHOT_KEY, "{{{").unwrap();
        let mut store = MessageStore::with_storage(StoreLimits::default(), Box::new(backing));
        store.add_user_message("survivor");
        store.enable_persistence(true);
        assert_eq!(store.len(), 1);
        assert_eq!(store.last().unwrap().content, "survivor");
    }

    #[test]
    fn clear_removes_buffer_and_snapshot() {
        let storage = FlakyStore::default();
        let mut store = persisted_store(storage.clone());
        store.add_user_message("hello");
        assert_eq!(storage.stored_records().len(), 1);

        store.clear_messages();
        assert!(store.is_empty());
        assert!(storage.state.lock().unwrap().value.is_none());
    }
}

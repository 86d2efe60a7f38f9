//! TUI-less "say" command

use std::error::Error;
use std::io::{self, Write};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::api::ChatRequest;
use crate::cli::RequestOptions;
use crate::core::chat_stream::{ChannelHandler, ChatStreamService, SessionOutcome, StreamMessage};
use crate::core::config::data::Config;
use crate::core::sanitize::escape_terminal;
use crate::core::store::MessageStore;

/// Build the request for `prompt`, carrying the turns stored before it.
pub fn build_request(
    config: &Config,
    store: &MessageStore,
    prompt: &str,
    options: &RequestOptions,
) -> ChatRequest {
    let mut request = ChatRequest::new(prompt, config.user_id());
    request.session_id = options.session.clone().unwrap_or_default();
    request.think_mode = options.think || config.think_mode();
    request.temperature = options.temperature.unwrap_or_else(|| config.temperature());
    request.file_ids = options.file_ids.clone();
    request.history = store.history();
    request
}

pub async fn run_say(
    config: &Config,
    store: &mut MessageStore,
    prompt: Vec<String>,
    options: RequestOptions,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        return Err("Nothing to send: the message is empty".into());
    }

    let request = build_request(config, store, &prompt, &options);
    store.add_user_message(prompt.as_str());

    let service = ChatStreamService::from_config(config)?;
    info!(url = service.chat_url(), "Sending chat message");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = service.start(request, ChannelHandler::new(tx, 0))?;
    store.begin_assistant_message();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;
    let mut failure = None;

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some((StreamMessage::Chunk(content), _)) => {
                    store.append_to_last_assistant(&content);
                    print!("{}", escape_terminal(&content));
                    io::stdout().flush()?;
                }
                Some((StreamMessage::Final(frame), _)) => {
                    if let Some(response) = frame.response.as_deref() {
                        store.update_last_assistant_message(response);
                    }
                }
                Some((StreamMessage::Metadata(metadata), _)) => {
                    debug!(%metadata, "Stream metadata");
                }
                Some((StreamMessage::Error(err), _)) => {
                    failure = Some(err);
                    break;
                }
                Some((StreamMessage::End, _)) | Some((StreamMessage::Cancelled, _)) | None => break,
            },
            _ = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                handle.cancel();
            }
        }
    }
    println!();

    let outcome = handle.wait().await;

    // A final frame already committed its text; otherwise keep what streamed.
    store.finish_assistant_message();

    match outcome {
        SessionOutcome::Completed { session_id } => {
            if let Some(id) = session_id.filter(|_| options.session.is_none()) {
                eprintln!("session: {id}");
            }
            Ok(())
        }
        SessionOutcome::Cancelled => {
            eprintln!("⚠️  Reply cancelled");
            Ok(())
        }
        SessionOutcome::Failed(err) => {
            let message = failure.unwrap_or_else(|| err.to_string());
            Err(format!("❌ Error: {message}").into())
        }
    }
}

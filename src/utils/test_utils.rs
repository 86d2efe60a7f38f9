use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};

use crate::core::chat_stream::StreamHandler;
use crate::core::frames::FinalFrame;
use crate::core::stream_error::StreamError;

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    Token(String),
    Metadata(Value),
    Final(Option<String>),
    Complete,
    Error(String),
    Cancelled,
}

#[derive(Clone, Default)]
pub struct RecordedEvents {
    inner: Arc<Mutex<Vec<RecordedEvent>>>,
    notify: Arc<Notify>,
}

impl RecordedEvents {
    fn push(&self, event: RecordedEvent) {
        self.inner.lock().unwrap().push(event);
        self.notify.notify_waiters();
    }

    pub fn snapshot(&self) -> Vec<RecordedEvent> {
        self.inner.lock().unwrap().clone()
    }

    pub async fn wait_for_len(&self, len: usize) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.inner.lock().unwrap().len() >= len {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for stream events");
    }
}

pub struct RecordingHandler {
    events: RecordedEvents,
}

impl RecordingHandler {
    pub fn new() -> (Self, RecordedEvents) {
        let events = RecordedEvents::default();
        (
            Self {
                events: events.clone(),
            },
            events,
        )
    }
}

impl StreamHandler for RecordingHandler {
    fn on_token(&mut self, text: &str) {
        self.events.push(RecordedEvent::Token(text.to_string()));
    }

    fn on_metadata(&mut self, metadata: &Value) {
        self.events.push(RecordedEvent::Metadata(metadata.clone()));
    }

    fn on_final(&mut self, frame: &FinalFrame) {
        self.events.push(RecordedEvent::Final(frame.response.clone()));
    }

    fn on_complete(&mut self) {
        self.events.push(RecordedEvent::Complete);
    }

    fn on_error(&mut self, error: &StreamError) {
        self.events.push(RecordedEvent::Error(error.to_string()));
    }

    fn on_cancelled(&mut self) {
        self.events.push(RecordedEvent::Cancelled);
    }
}

pub struct ServerScript {
    status: u16,
    content_type: &'static str,
    chunks: Vec<Vec<u8>>,
    hang: bool,
}

impl ServerScript {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            chunks: vec![body.as_bytes().to_vec()],
            hang: false,
        }
    }

    /// Deliver the body in fixed-size pieces, cutting through lines.
    pub fn ok_split(body: &str, size: usize) -> Self {
        Self {
            chunks: body.as_bytes().chunks(size).map(<[u8]>::to_vec).collect(),
            ..Self::ok(body)
        }
    }

    /// Send the body, then keep the connection open without writing.
    pub fn ok_then_hang(body: &str) -> Self {
        Self {
            hang: true,
            ..Self::ok(body)
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            chunks: vec![body.as_bytes().to_vec()],
            hang: false,
        }
    }
}

pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

pub struct MockServer {
    pub base_url: String,
    captured: oneshot::Receiver<CapturedRequest>,
}

impl MockServer {
    pub async fn request(self) -> CapturedRequest {
        self.captured.await.expect("server should capture a request")
    }
}

/// Serve exactly one request with the scripted response.
pub async fn spawn_sse_server(script: ServerScript) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let (request_line, headers, body) = read_http_request(&mut socket)
            .await
            .expect("request should parse");
        let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let _ = tx.send(CapturedRequest {
            request_line,
            headers,
            body,
        });

        let head = if script.status == 200 {
            format!(
                "HTTP/1.1 200 OK\r\ncontent-type: {}\r\ncache-control: no-cache\r\nconnection: close\r\n\r\n",
                script.content_type
            )
        } else {
            let length: usize = script.chunks.iter().map(Vec::len).sum();
            format!(
                "HTTP/1.1 {} Status\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                script.status, script.content_type, length
            )
        };
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for chunk in &script.chunks {
            if socket.write_all(chunk).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        if script.hang {
            std::future::pending::<()>().await;
        }
        let _ = socket.shutdown().await;
    });

    MockServer {
        base_url: format!("http://{addr}"),
        captured: rx,
    }
}

pub async fn read_http_request(
    stream: &mut TcpStream,
) -> Result<(String, Vec<(String, String)>, Vec<u8>), String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos + 4;
        }
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok((request_line, headers, body))
}

//! Shared fixtures for integration tests.
//!
//! - [`StubServer`]: a one-request-per-connection HTTP/1.1 server on a random
//!   local port that records every request and answers from a handler.
//! - [`ImapStub`]: a line-oriented IMAP server that records each tagged
//!   command and answers from a script.
//! - [`ScriptedModel`] / [`RecordingProvider`]: in-process doubles for the
//!   two capabilities.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use inbox_assistant::config::ProviderKind;
use inbox_assistant::domain::{Email, EmailId, Sender};
use inbox_assistant::providers::ai::{AiModel, LlmError, LlmResult};
use inbox_assistant::providers::email::{EmailProvider, ProviderError, Result};

// ============================================================================
// Stub HTTP server
// ============================================================================

/// A request as the stub server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Canned response.
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
}

impl StubResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: String::new(),
        }
    }
}

type Handler = dyn Fn(&RecordedRequest) -> StubResponse + Send + Sync;

pub struct StubServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = Arc::clone(&recorded);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Some(request) = read_request(stream, &*handler, &recorded).await {
                        tracing::trace!(?request, "stub served");
                    }
                });
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    /// Base URL without a trailing slash.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_request(
    mut stream: TcpStream,
    handler: &Handler,
    recorded: &Mutex<Vec<RecordedRequest>>,
) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = buf.len().min(head_end + content_length);
    let body = String::from_utf8_lossy(&buf[head_end..body_end]).to_string();

    let request = RecordedRequest {
        method,
        path,
        headers,
        body,
    };
    recorded.lock().unwrap().push(request.clone());

    let response = handler(&request);
    let raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        reason_phrase(response.status),
        response.body.len(),
        response.body
    );
    stream.write_all(raw.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()?;

    Some(request)
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// A local URL nothing listens on.
pub fn unreachable_url() -> String {
    "http://127.0.0.1:1".to_string()
}

// ============================================================================
// Stub IMAP server
// ============================================================================

/// How the stub answers one command.
#[derive(Debug, Clone)]
pub enum ImapReply {
    /// Untagged lines (CRLF-terminated, may carry literals), then the tagged
    /// completion with `status` (`OK`, `NO` or `BAD`).
    Done {
        untagged: String,
        status: &'static str,
    },
    /// Close the connection without answering.
    Hangup,
}

impl ImapReply {
    pub fn ok() -> Self {
        Self::ok_with("")
    }

    pub fn ok_with(untagged: impl Into<String>) -> Self {
        ImapReply::Done {
            untagged: untagged.into(),
            status: "OK",
        }
    }

    pub fn no() -> Self {
        ImapReply::Done {
            untagged: String::new(),
            status: "NO",
        }
    }
}

type ImapHandler = dyn Fn(&str) -> ImapReply + Send + Sync;

/// Scripted IMAP server. The handler sees each command without its tag,
/// e.g. `UID STORE 7 +FLAGS (\Seen)`.
pub struct ImapStub {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl ImapStub {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str) -> ImapReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<ImapHandler> = Arc::new(handler);

        let recorded = Arc::clone(&commands);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = Arc::clone(&recorded);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = serve_imap(stream, &*handler, &recorded).await {
                        tracing::trace!(error = %e, "imap stub connection ended");
                    }
                });
            }
        });

        Self {
            addr,
            commands,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Commands received so far, tags stripped.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Drop for ImapStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_imap(
    stream: TcpStream,
    handler: &ImapHandler,
    recorded: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write.write_all(b"* OK stub IMAP4rev1 ready\r\n").await?;

    while let Some(line) = lines.next_line().await? {
        let Some((tag, command)) = line.split_once(' ') else {
            continue;
        };
        recorded.lock().unwrap().push(command.to_string());

        match handler(command) {
            ImapReply::Done { untagged, status } => {
                let reply = format!("{}{} {} stub\r\n", untagged, tag, status);
                write.write_all(reply.as_bytes()).await?;
            }
            ImapReply::Hangup => return Ok(()),
        }
    }
    Ok(())
}

// ============================================================================
// Capability doubles
// ============================================================================

pub fn email(id: &str, subject: &str) -> Email {
    Email {
        id: EmailId::from(id),
        subject: subject.to_string(),
        from: Sender::with_name(format!("{}@example.com", id), "Example Sender"),
        preview: format!("Preview of {}", subject),
        received: "2024-05-06T08:00:00Z".to_string(),
        is_read: false,
        folder: Some("inbox".to_string()),
    }
}

pub fn three_emails() -> Vec<Email> {
    vec![
        email("e1", "Weekly newsletter"),
        email("e2", "Your receipt"),
        email("e3", "Product update"),
    ]
}

/// Answers every completion from a script. Categorization goes through the
/// trait's provided `categorize`, so parsing and soft failure are real.
pub struct ScriptedModel {
    answer: Box<dyn Fn(&str) -> LlmResult<String> + Send + Sync>,
    reachable: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn answering(json: &'static str) -> Self {
        Self::with(move |_| Ok(json.to_string()))
    }

    pub fn failing() -> Self {
        Self::with(|_| Err(LlmError::Unavailable("connection refused".to_string())))
    }

    pub fn with<F>(answer: F) -> Self
    where
        F: Fn(&str) -> LlmResult<String> + Send + Sync + 'static,
    {
        Self {
            answer: Box::new(answer),
            reachable: true,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }
}

#[async_trait]
impl AiModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "script-1"
    }

    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.answer)(prompt)
    }

    async fn test_connection(&self) -> bool {
        self.reachable
    }
}

/// Every call a [`RecordingProvider`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    TestConnection,
    GetEmails { folder: String, limit: usize },
    Move { id: String, destination: String },
    MarkRead { id: String },
    Delete { id: String },
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::Move { .. } | Call::MarkRead { .. } | Call::Delete { .. }
        )
    }
}

/// In-memory provider that records calls and can reject chosen ids.
#[derive(Clone, Default)]
pub struct RecordingProvider {
    emails: Vec<Email>,
    reject: HashSet<String>,
    fetch_fails: bool,
    unreachable: bool,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingProvider {
    pub fn new(emails: Vec<Email>) -> Self {
        Self {
            emails,
            ..Self::default()
        }
    }

    /// Mutations for `id` return an error.
    pub fn rejecting(mut self, id: &str) -> Self {
        self.reject.insert(id.to_string());
        self
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fetch_fails = true;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Shared view of the call log; stays valid after the provider is boxed.
    pub fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn outcome(&self, id: &EmailId) -> Result<()> {
        if self.reject.contains(id.as_str()) {
            Err(ProviderError::Provider(format!("server rejected {}", id)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EmailProvider for RecordingProvider {
    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Imap
    }

    async fn get_emails(&self, folder: &str, limit: usize) -> Result<Vec<Email>> {
        self.record(Call::GetEmails {
            folder: folder.to_string(),
            limit,
        });
        if self.fetch_fails {
            return Err(ProviderError::Connection("mailbox went away".to_string()));
        }
        Ok(self.emails.iter().take(limit).cloned().collect())
    }

    async fn move_email(&self, id: &EmailId, destination: &str) -> Result<()> {
        self.record(Call::Move {
            id: id.to_string(),
            destination: destination.to_string(),
        });
        self.outcome(id)
    }

    async fn mark_read(&self, id: &EmailId) -> Result<()> {
        self.record(Call::MarkRead { id: id.to_string() });
        self.outcome(id)
    }

    async fn delete_email(&self, id: &EmailId) -> Result<()> {
        self.record(Call::Delete { id: id.to_string() });
        self.outcome(id)
    }

    async fn test_connection(&self) -> bool {
        self.record(Call::TestConnection);
        !self.unreachable
    }
}

pub fn mutations(calls: &Arc<Mutex<Vec<Call>>>) -> Vec<Call> {
    calls
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.is_mutation())
        .cloned()
        .collect()
}

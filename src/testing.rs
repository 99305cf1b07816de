//! In-memory doubles for the provenance, document, boundary and feed seams,
//! plus [`StubServer`] for exercising the real HTTP clients.
//!
//! Compiled for unit tests and behind the `test-utils` feature for the
//! integration tests under `tests/`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{DocumentError, FeedError, HttpError, SyncError};
use crate::resolve::{CodeHost, GitRef, ImageRegistry, ImageTag};
use crate::source::DocumentSource;
use crate::sync::{PolicyBoundary, SelectedActions};
use crate::watch::{EventSource, FeedEvent};

fn unavailable(url: &str) -> HttpError {
    HttpError::Status {
        status: 503,
        url: url.to_string(),
        body: "service unavailable".to_string(),
    }
}

fn not_found(url: String) -> HttpError {
    HttpError::Status {
        status: 404,
        url,
        body: "Not Found".to_string(),
    }
}

/// Code host keyed by `org/repo`; unknown repositories have no refs
#[derive(Debug, Default)]
pub struct FakeCodeHost {
    tags: HashMap<String, Vec<GitRef>>,
    heads: HashMap<String, Vec<GitRef>>,
    default_branches: HashMap<String, String>,
    peeled: HashMap<String, String>,
    commits: HashSet<String>,
    unreachable: bool,
}

impl FakeCodeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, repo: &str, refs: Vec<GitRef>) -> Self {
        self.tags.insert(repo.to_string(), refs);
        self
    }

    pub fn with_heads(mut self, repo: &str, refs: Vec<GitRef>) -> Self {
        self.heads.insert(repo.to_string(), refs);
        self
    }

    pub fn with_default_branch(mut self, repo: &str, branch: &str) -> Self {
        self.default_branches
            .insert(repo.to_string(), branch.to_string());
        self
    }

    /// Annotated tag object `tag_sha` peels to `commit_sha`
    pub fn with_peeled(mut self, tag_sha: &str, commit_sha: &str) -> Self {
        self.peeled
            .insert(tag_sha.to_string(), commit_sha.to_string());
        self
    }

    pub fn with_commit(mut self, sha: &str) -> Self {
        self.commits.insert(sha.to_string());
        self
    }

    /// Fail every call as if the API were down
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    fn check(&self, org: &str, repo: &str) -> Result<String, HttpError> {
        let key = format!("{}/{}", org, repo);
        if self.unreachable {
            return Err(unavailable(&key));
        }
        Ok(key)
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn tag_refs(&self, org: &str, repo: &str) -> Result<Vec<GitRef>, HttpError> {
        let key = self.check(org, repo)?;
        Ok(self.tags.get(&key).cloned().unwrap_or_default())
    }

    async fn head_refs(&self, org: &str, repo: &str) -> Result<Vec<GitRef>, HttpError> {
        let key = self.check(org, repo)?;
        Ok(self.heads.get(&key).cloned().unwrap_or_default())
    }

    async fn default_branch(&self, org: &str, repo: &str) -> Result<String, HttpError> {
        let key = self.check(org, repo)?;
        self.default_branches
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    async fn peel_tag(&self, org: &str, repo: &str, tag_sha: &str) -> Result<String, HttpError> {
        let key = self.check(org, repo)?;
        self.peeled
            .get(tag_sha)
            .cloned()
            .ok_or_else(|| not_found(format!("{}/git/tags/{}", key, tag_sha)))
    }

    async fn commit_exists(&self, org: &str, repo: &str, sha: &str) -> Result<bool, HttpError> {
        self.check(org, repo)?;
        Ok(self.commits.contains(sha))
    }
}

/// Registry keyed by `namespace/image`; unknown images have no tags
#[derive(Debug, Default)]
pub struct FakeRegistry {
    tags: HashMap<String, Vec<ImageTag>>,
    unreachable: bool,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, image: &str, tags: Vec<ImageTag>) -> Self {
        self.tags.insert(image.to_string(), tags);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn list_tags(&self, namespace: &str, image: &str) -> Result<Vec<ImageTag>, HttpError> {
        let key = format!("{}/{}", namespace, image);
        if self.unreachable {
            return Err(unavailable(&key));
        }
        Ok(self.tags.get(&key).cloned().unwrap_or_default())
    }
}

/// Boundary that records every update it receives
#[derive(Debug, Default)]
pub struct FakeBoundary {
    pushes: Mutex<Vec<SelectedActions>>,
    reject_with: Option<u16>,
}

impl FakeBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record updates but answer each with `status`
    pub fn rejecting(status: u16) -> Self {
        Self {
            pushes: Mutex::new(Vec::new()),
            reject_with: Some(status),
        }
    }

    /// Updates received so far, accepted or not
    pub fn pushes(&self) -> Vec<SelectedActions> {
        self.pushes
            .lock()
            .map(|pushes| pushes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PolicyBoundary for FakeBoundary {
    async fn update_selected_actions(&self, update: &SelectedActions) -> Result<(), SyncError> {
        if let Ok(mut pushes) = self.pushes.lock() {
            pushes.push(update.clone());
        }
        match self.reject_with {
            Some(status) => Err(SyncError::Rejected {
                status,
                body: "{\"message\":\"rejected\"}".to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Document held in memory; `missing()` fails like an unreachable host
#[derive(Debug, Clone)]
pub struct FakeDocument {
    text: Option<String>,
}

impl FakeDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    pub fn missing() -> Self {
        Self { text: None }
    }
}

#[async_trait]
impl DocumentSource for FakeDocument {
    fn describe(&self) -> String {
        "memory://approved_patterns.yml".to_string()
    }

    async fn fetch(&self) -> Result<String, DocumentError> {
        match &self.text {
            Some(text) => Ok(text.clone()),
            None => Err(DocumentError::Fetch(not_found(self.describe()))),
        }
    }
}

/// Feed replaying a fixed script, then staying silent forever
#[derive(Debug, Default)]
pub struct FakeEventSource {
    script: VecDeque<Result<Option<FeedEvent>, FeedError>>,
}

impl FakeEventSource {
    pub fn new(script: Vec<Result<Option<FeedEvent>, FeedError>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl EventSource for FakeEventSource {
    async fn next_event(&mut self) -> Result<Option<FeedEvent>, FeedError> {
        match self.script.pop_front() {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }
}

/// What a [`StubServer`] handler sees of one request
#[derive(Debug, Clone)]
pub struct StubRequest {
    /// `http://127.0.0.1:<port>`
    pub base: String,
    /// Path and query, e.g. `/repos/apache/httpd/git/refs/tags?page=1`
    pub target: String,
    /// Zero-based arrival order
    pub index: usize,
}

/// Local HTTP/1.1 server answering every request from a handler.
///
/// Each response closes its connection, so request order is arrival order.
pub struct StubServer {
    base: String,
    hits: Arc<AtomicUsize>,
    targets: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start<F>(handler: F) -> std::io::Result<Self>
    where
        F: Fn(&StubRequest) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base = format!("http://{}", listener.local_addr()?);
        let hits = Arc::new(AtomicUsize::new(0));
        let targets = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(handler);

        let server = Self {
            base: base.clone(),
            hits: hits.clone(),
            targets: targets.clone(),
        };
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let index = hits.fetch_add(1, Ordering::SeqCst);
                let (base, targets, handler) = (base.clone(), targets.clone(), handler.clone());
                tokio::spawn(async move {
                    answer(socket, index, base, targets, handler.as_ref()).await;
                });
            }
        });
        Ok(server)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Requests accepted so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Request targets in arrival order
    pub fn targets(&self) -> Vec<String> {
        self.targets
            .lock()
            .map(|targets| targets.clone())
            .unwrap_or_default()
    }
}

async fn answer<F>(
    mut socket: TcpStream,
    index: usize,
    base: String,
    targets: Arc<Mutex<Vec<String>>>,
    handler: &F,
) where
    F: Fn(&StubRequest) -> (u16, String),
{
    let Some(target) = read_request_target(&mut socket).await else {
        return;
    };
    if let Ok(mut targets) = targets.lock() {
        targets.push(target.clone());
    }
    let (status, body) = handler(&StubRequest {
        base,
        target,
        index,
    });
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let response = format!(
        "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Read the request head and return its target
async fn read_request_target(socket: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
    }
    let head = String::from_utf8_lossy(&head);
    head.lines()
        .next()?
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
}

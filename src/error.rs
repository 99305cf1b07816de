//! Error types for the allowlist engine
//!
//! Per-entry failures (`PatternError`, `ResolveError`) are logged and the
//! entry is skipped. Cycle failures (`DocumentError`, `SyncError`) end the
//! cycle. `anyhow` is only used at the binary edge.

use thiserror::Error;

/// An approved-pattern line that cannot be turned into an entry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Invalid entry (no repository provided): {entry}")]
    MissingRepository { entry: String },

    #[error("Invalid entry (wildcard repository name): {entry}")]
    WildcardRepository { entry: String },

    #[error("Invalid entry (empty path segment): {entry}")]
    EmptySegment { entry: String },

    #[error("Invalid entry (':' in organization or repository): {entry}")]
    SchemeInPath { entry: String },

    #[error("Invalid registry entry (no image provided): {entry}")]
    MissingImage { entry: String },
}

/// A parsed entry that could not be pinned
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Tag '{tag}' not found in {source_id} tags")]
    TagNotFound { tag: String, source_id: String },

    #[error("Branch '{branch}' not found in {source_id} heads")]
    BranchNotFound { branch: String, source_id: String },

    #[error("Commit {sha} does not exist in {source_id}")]
    CommitNotFound { sha: String, source_id: String },

    #[error("{source_id} has no tags to pin to")]
    NoTags { source_id: String },

    #[error("Upstream lookup failed: {0}")]
    Upstream(#[from] HttpError),
}

/// Transport and protocol failures talking to an upstream API
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("{url} returned {status}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for failures worth another attempt: timeouts, connection
    /// errors, throttling and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Request { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Decode { .. } | Self::Client(_) => false,
        }
    }
}

/// The approved-pattern document could not be obtained
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch approved patterns: {0}")]
    Fetch(#[from] HttpError),

    #[error("Approved patterns document is not a list of strings: {0}")]
    Format(String),
}

/// The authorization boundary did not accept the update
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Selected-actions update rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Selected-actions update failed: {0}")]
    Transport(#[from] HttpError),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Credential environment variable {0} is not set")]
    MissingCredential(String),

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Client(#[from] HttpError),
}

/// Change-event feed failures; the watcher reconnects on these
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Feed connection failed: {0}")]
    Connect(#[from] HttpError),

    #[error("Feed stream interrupted: {0}")]
    Stream(String),
}

/// Failure of a whole synchronization cycle
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

//! Approved-pattern document loading
//!
//! The document is a YAML list of strings. A plain list of lines (blank lines
//! and `#` comments ignored) is accepted too.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_yaml::Value;

use crate::config::AllowlistConfig;
use crate::error::{ConfigError, DocumentError};
use crate::http::{insert_bearer, ApiClient};

/// Supplies the current approved-pattern document
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Human-readable location, for logs
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<String, DocumentError>;
}

/// Document read from disk
pub struct LocalDocument {
    path: PathBuf,
}

impl LocalDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DocumentSource for LocalDocument {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<String, DocumentError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| DocumentError::Io {
                path: self.describe(),
                source,
            })
    }
}

/// Document fetched from the raw-content URL of the source repository
pub struct RemoteDocument {
    api: ApiClient,
    url: String,
}

impl RemoteDocument {
    pub fn new(api: ApiClient, url: impl Into<String>) -> Self {
        Self {
            api,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DocumentSource for RemoteDocument {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<String, DocumentError> {
        Ok(self.api.get_text(&self.url).await?)
    }
}

/// Pick the configured document source: a local path wins over the URL
pub fn from_config(config: &AllowlistConfig) -> Result<Box<dyn DocumentSource>, ConfigError> {
    if let Some(path) = &config.source.local_path {
        return Ok(Box::new(LocalDocument::new(path.clone())));
    }
    // The raw-content host accepts the API token for private repositories
    let mut headers = HeaderMap::new();
    if let Ok(token) = config.github_token() {
        insert_bearer(&mut headers, &token);
    }
    let api = ApiClient::new(&config.http, headers)?;
    Ok(Box::new(RemoteDocument::new(api, config.raw_document_url())))
}

/// Entry lines of a document, plus list items that are not strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentLines {
    pub entries: Vec<String>,
    /// Rendering of each non-string item, for logs
    pub invalid: Vec<String>,
}

impl DocumentLines {
    pub fn len(&self) -> usize {
        self.entries.len() + self.invalid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split a document into its entry lines.
///
/// Only a document that is not a list fails; a bad item is reported in
/// [`DocumentLines::invalid`] and the rest of the list is kept.
pub fn parse_document(text: &str) -> Result<DocumentLines, DocumentError> {
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Sequence(items)) => {
            let mut lines = DocumentLines::default();
            for item in items {
                match item {
                    Value::String(s) if s.trim().is_empty() => {}
                    Value::String(s) => lines.entries.push(s),
                    other => lines.invalid.push(render(&other)),
                }
            }
            Ok(lines)
        }
        Ok(Value::Null) => Ok(DocumentLines::default()),
        Ok(Value::Mapping(_)) => Err(DocumentError::Format(
            "expected a list, found a mapping".to_string(),
        )),
        // Not YAML, or YAML folding the lines into one scalar
        _ => Ok(DocumentLines {
            entries: plain_lines(text),
            invalid: Vec::new(),
        }),
    }
}

fn render(value: &Value) -> String {
    match serde_yaml::to_string(value) {
        Ok(yaml) => yaml.trim().to_string(),
        Err(_) => format!("{:?}", value),
    }
}

fn plain_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

//! Provenance source traits
//!
//! The resolver only needs read-only listings from the code host and the
//! registry. Implementations must be Send + Sync so entries can be resolved
//! concurrently.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::HttpError;

/// A git reference as listed by the code host (`refs/tags/v1`, `refs/heads/main`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub name: String,
    pub object: GitObject,
}

/// The object a reference points at
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitObject {
    pub sha: String,
    /// `commit` for lightweight tags and branches, `tag` for annotated tags
    #[serde(rename = "type")]
    pub kind: String,
}

impl GitRef {
    pub fn commit(name: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            object: GitObject {
                sha: sha.into(),
                kind: "commit".to_string(),
            },
        }
    }

    pub fn annotated(name: impl Into<String>, tag_sha: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            object: GitObject {
                sha: tag_sha.into(),
                kind: "tag".to_string(),
            },
        }
    }

    pub fn is_annotated_tag(&self) -> bool {
        self.object.kind == "tag"
    }
}

/// One image tag with its content digest
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageTag {
    pub name: String,
    /// Missing for tags whose manifest was deleted
    #[serde(default)]
    pub digest: Option<String>,
}

impl ImageTag {
    pub fn new(name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: Some(digest.into()),
        }
    }
}

/// Read-only code-host provenance (GitHub)
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// All `refs/tags/*` references
    async fn tag_refs(&self, org: &str, repo: &str) -> Result<Vec<GitRef>, HttpError>;

    /// All `refs/heads/*` references
    async fn head_refs(&self, org: &str, repo: &str) -> Result<Vec<GitRef>, HttpError>;

    /// Name of the repository's default branch
    async fn default_branch(&self, org: &str, repo: &str) -> Result<String, HttpError>;

    /// Commit an annotated tag object points at
    async fn peel_tag(&self, org: &str, repo: &str, tag_sha: &str) -> Result<String, HttpError>;

    /// Whether `sha` names an existing commit
    async fn commit_exists(&self, org: &str, repo: &str, sha: &str) -> Result<bool, HttpError>;
}

/// Read-only registry provenance (Docker Hub)
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Every tag of `namespace/image`, across all pages
    async fn list_tags(&self, namespace: &str, image: &str) -> Result<Vec<ImageTag>, HttpError>;
}

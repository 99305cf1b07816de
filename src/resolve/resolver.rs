//! Tag-resolution policy
//!
//! Applies the code-host and registry rules to one parsed entry and produces
//! the references it contributes to the allowlist.

use std::sync::Arc;

use chrono::NaiveDate;

use super::traits::{CodeHost, ImageRegistry};
use crate::allowlist::{RefMetadata, ReferenceMap};
use crate::config::{AllowlistConfig, WildcardPolicy};
use crate::error::ResolveError;
use crate::pattern::{ApprovedEntry, SourceKind, TagSpecifier};

const WILDCARD: &str = "*";

/// Expiration dates in effect for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expirations {
    /// Given to every pinned commit or digest
    pub pinned: NaiveDate,
    /// Given to preserved wildcards and tag aliases
    pub review: NaiveDate,
}

impl Expirations {
    pub fn from_config(config: &AllowlistConfig, today: NaiveDate) -> Self {
        Self {
            pinned: config.expiration.default,
            review: config.expiration.review_date(today),
        }
    }
}

/// Resolves approved entries against the code host and registry
pub struct ReferenceResolver {
    code_host: Arc<dyn CodeHost>,
    registry: Arc<dyn ImageRegistry>,
    wildcard: WildcardPolicy,
    verify_pinned: bool,
    expirations: Expirations,
}

impl ReferenceResolver {
    pub fn new(
        code_host: Arc<dyn CodeHost>,
        registry: Arc<dyn ImageRegistry>,
        expirations: Expirations,
    ) -> Self {
        Self {
            code_host,
            registry,
            wildcard: WildcardPolicy::default(),
            verify_pinned: false,
            expirations,
        }
    }

    pub fn from_config(
        config: &AllowlistConfig,
        code_host: Arc<dyn CodeHost>,
        registry: Arc<dyn ImageRegistry>,
        today: NaiveDate,
    ) -> Self {
        Self::new(code_host, registry, Expirations::from_config(config, today))
            .with_wildcard_policy(config.policy.wildcard)
            .with_pinned_verification(config.policy.verify_pinned_commits)
    }

    pub fn with_wildcard_policy(mut self, policy: WildcardPolicy) -> Self {
        self.wildcard = policy;
        self
    }

    pub fn with_pinned_verification(mut self, verify: bool) -> Self {
        self.verify_pinned = verify;
        self
    }

    /// Resolve an entry, logging and swallowing failures.
    ///
    /// `None` means "skip this entry"; it never aborts the cycle.
    pub async fn resolve(&self, entry: &ApprovedEntry) -> Option<ReferenceMap> {
        match self.try_resolve(entry).await {
            Ok(refs) => {
                tracing::debug!(entry = %entry.raw, references = refs.len(), "Resolved entry");
                Some(refs)
            }
            Err(e) => {
                tracing::warn!(entry = %entry.raw, error = %e, "Skipping unresolved entry");
                None
            }
        }
    }

    pub async fn try_resolve(&self, entry: &ApprovedEntry) -> Result<ReferenceMap, ResolveError> {
        match entry.kind {
            SourceKind::CodeHost => self.resolve_code_host(entry).await,
            SourceKind::Registry => self.resolve_registry(entry).await,
        }
    }

    async fn resolve_code_host(&self, entry: &ApprovedEntry) -> Result<ReferenceMap, ResolveError> {
        let (org, repo) = (entry.organization.as_str(), entry.repository.as_str());
        let source_id = entry.identity().to_string();
        let mut refs = ReferenceMap::new();

        match &entry.tag {
            TagSpecifier::Wildcard => match self.wildcard {
                WildcardPolicy::Preserve => {
                    refs.insert(
                        WILDCARD.to_string(),
                        RefMetadata::kept(self.expirations.review),
                    );
                }
                WildcardPolicy::PinHead => {
                    let branch = self.code_host.default_branch(org, repo).await?;
                    tracing::info!(source = %source_id, %branch, "Pinning to the head of the default branch");
                    let sha = self.branch_head(org, repo, &branch, &source_id).await?;
                    refs.insert(sha, RefMetadata::expiring(self.expirations.pinned));
                }
            },
            TagSpecifier::Latest => {
                let sha = self.branch_head(org, repo, "latest", &source_id).await?;
                refs.insert(sha, RefMetadata::expiring(self.expirations.pinned));
            }
            TagSpecifier::Pinned(sha) => {
                if self.verify_pinned {
                    if !self.code_host.commit_exists(org, repo, sha).await? {
                        return Err(ResolveError::CommitNotFound {
                            sha: sha.clone(),
                            source_id,
                        });
                    }
                } else {
                    tracing::debug!(source = %source_id, %sha, "Trusting 40-character specifier as a commit");
                }
                refs.insert(sha.clone(), RefMetadata::expiring(self.expirations.pinned));
            }
            TagSpecifier::Named(tag) => {
                let sha = self.tag_commit(org, repo, tag, &source_id).await?;
                refs.insert(sha, RefMetadata::expiring(self.expirations.pinned));
                // Keep the tag visible next to its hash until someone reconfirms it
                refs.insert(tag.clone(), RefMetadata::expiring(self.expirations.review));
            }
        }

        Ok(refs)
    }

    async fn branch_head(
        &self,
        org: &str,
        repo: &str,
        branch: &str,
        source_id: &str,
    ) -> Result<String, ResolveError> {
        let wanted = format!("refs/heads/{}", branch);
        self.code_host
            .head_refs(org, repo)
            .await?
            .into_iter()
            .find(|r| r.name == wanted)
            .map(|r| r.object.sha)
            .ok_or_else(|| ResolveError::BranchNotFound {
                branch: branch.to_string(),
                source_id: source_id.to_string(),
            })
    }

    async fn tag_commit(
        &self,
        org: &str,
        repo: &str,
        tag: &str,
        source_id: &str,
    ) -> Result<String, ResolveError> {
        let wanted = format!("refs/tags/{}", tag);
        let found = self
            .code_host
            .tag_refs(org, repo)
            .await?
            .into_iter()
            .find(|r| r.name == wanted)
            .ok_or_else(|| ResolveError::TagNotFound {
                tag: tag.to_string(),
                source_id: source_id.to_string(),
            })?;

        if found.is_annotated_tag() {
            Ok(self.code_host.peel_tag(org, repo, &found.object.sha).await?)
        } else {
            Ok(found.object.sha)
        }
    }

    async fn resolve_registry(&self, entry: &ApprovedEntry) -> Result<ReferenceMap, ResolveError> {
        let source_id = entry.identity().to_string();

        let digest = match &entry.tag {
            TagSpecifier::Pinned(digest) => digest.clone(),
            TagSpecifier::Wildcard => {
                let tags = self
                    .registry
                    .list_tags(&entry.organization, &entry.repository)
                    .await?;
                tracing::info!(source = %source_id, tags = tags.len(), "Pinning image to the newest tag name");
                tags.into_iter()
                    .filter_map(|t| t.digest.map(|d| (t.name, d)))
                    .max_by(|a, b| a.0.cmp(&b.0))
                    .map(|(_, digest)| digest)
                    .ok_or(ResolveError::NoTags { source_id })?
            }
            // `latest` is an ordinary tag name for images
            tag @ (TagSpecifier::Named(_) | TagSpecifier::Latest) => {
                let name = tag.to_string();
                self.registry
                    .list_tags(&entry.organization, &entry.repository)
                    .await?
                    .into_iter()
                    .find(|t| t.name == name)
                    .and_then(|t| t.digest)
                    .ok_or(ResolveError::TagNotFound {
                        tag: name,
                        source_id,
                    })?
            }
        };

        let mut refs = ReferenceMap::new();
        refs.insert(digest, RefMetadata::expiring(self.expirations.pinned));
        Ok(refs)
    }
}

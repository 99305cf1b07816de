//! Approved-pattern parsing
//!
//! Turns one author-supplied line (`org/repo`, `org/repo@tag`,
//! `docker://image:tag`) into an [`ApprovedEntry`]. Lines that cannot name a
//! resolution target are rejected with a [`PatternError`].

use std::fmt;

use crate::error::PatternError;

/// Prefix marking a Docker Hub image entry
pub const DOCKER_SCHEME: &str = "docker";

/// Namespace Docker Hub uses for official single-segment images
const DOCKER_OFFICIAL_NAMESPACE: &str = "library";

/// Where an entry's provenance is looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Code-host repository (GitHub action)
    CodeHost,
    /// Container registry image
    Registry,
}

/// The version part of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSpecifier {
    /// `*`: default-branch head (code host) or newest tag (registry)
    Wildcard,
    /// Branch literally named `latest` (code host only)
    Latest,
    /// Already-pinned identifier: a 40-hex commit or a `sha256:` digest
    Pinned(String),
    /// Any other tag or branch name
    Named(String),
}

impl TagSpecifier {
    /// Classify a code-host specifier
    fn code_host(tag: &str) -> Self {
        if tag.contains('*') {
            Self::Wildcard
        } else if tag == "latest" {
            Self::Latest
        } else if is_commit_sha(tag) {
            Self::Pinned(tag.to_string())
        } else {
            Self::Named(tag.to_string())
        }
    }

    /// Classify a registry specifier; `latest` is an ordinary tag there
    fn registry(tag: &str) -> Self {
        if tag.contains('*') {
            Self::Wildcard
        } else if tag.starts_with("sha256:") {
            Self::Pinned(tag.to_string())
        } else {
            Self::Named(tag.to_string())
        }
    }
}

impl fmt::Display for TagSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => write!(f, "*"),
            Self::Latest => write!(f, "latest"),
            Self::Pinned(id) | Self::Named(id) => write!(f, "{}", id),
        }
    }
}

/// Canonical identity of a source: `org/repo` or `docker://namespace/image`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceIdentity(String);

impl SourceIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One parsed line of the approved-pattern document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedEntry {
    /// The line as written
    pub raw: String,
    pub kind: SourceKind,
    /// Code-host organization or registry namespace
    pub organization: String,
    /// Repository name or image name
    pub repository: String,
    pub tag: TagSpecifier,
}

impl ApprovedEntry {
    pub fn identity(&self) -> SourceIdentity {
        match self.kind {
            SourceKind::CodeHost => {
                SourceIdentity(format!("{}/{}", self.organization, self.repository))
            }
            SourceKind::Registry => SourceIdentity(format!(
                "{}://{}/{}",
                DOCKER_SCHEME, self.organization, self.repository
            )),
        }
    }
}

/// Parse one approved-pattern line
pub fn parse_entry(raw: &str) -> Result<ApprovedEntry, PatternError> {
    let entry = raw.trim();
    // `docker:image` and `docker://image` both name a registry entry
    match entry.strip_prefix("docker:") {
        Some(image) => parse_registry(entry, image.trim_start_matches('/')),
        None => parse_code_host(entry),
    }
}

fn parse_code_host(entry: &str) -> Result<ApprovedEntry, PatternError> {
    let (path, tag) = match entry.split_once('@') {
        Some((path, tag)) => (path, tag),
        // No tag means the head of the default branch
        None => (entry, "*"),
    };

    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 2 {
        return Err(PatternError::MissingRepository {
            entry: entry.to_string(),
        });
    }
    // Anything past org/repo is a sub-action path, not part of identity
    let (organization, repository) = (segments[0], segments[1]);
    if repository == "*" {
        return Err(PatternError::WildcardRepository {
            entry: entry.to_string(),
        });
    }
    if organization.is_empty() || repository.is_empty() || tag.is_empty() {
        return Err(PatternError::EmptySegment {
            entry: entry.to_string(),
        });
    }
    if organization.contains(':') || repository.contains(':') {
        return Err(PatternError::SchemeInPath {
            entry: entry.to_string(),
        });
    }

    Ok(ApprovedEntry {
        raw: entry.to_string(),
        kind: SourceKind::CodeHost,
        organization: organization.to_string(),
        repository: repository.to_string(),
        tag: TagSpecifier::code_host(tag),
    })
}

fn parse_registry(entry: &str, image: &str) -> Result<ApprovedEntry, PatternError> {
    let (name, tag) = if let Some((name, digest)) = image.split_once('@') {
        (name, digest)
    } else {
        match image.rsplit_once(':') {
            // A colon before the last slash is a registry port, not a tag
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (image, "*"),
        }
    };

    if name.is_empty() || tag.is_empty() || name.split('/').any(str::is_empty) {
        return Err(PatternError::MissingImage {
            entry: entry.to_string(),
        });
    }

    let (organization, repository) = match name.split_once('/') {
        Some((namespace, image)) => (namespace, image),
        None => (DOCKER_OFFICIAL_NAMESPACE, name),
    };

    Ok(ApprovedEntry {
        raw: entry.to_string(),
        kind: SourceKind::Registry,
        organization: organization.to_string(),
        repository: repository.to_string(),
        tag: TagSpecifier::registry(tag),
    })
}

/// True for a 40-character hexadecimal string
pub fn is_commit_sha(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_two_segment_entry_recovers_org_and_repo() {
        for (org, repo) in [
            ("apache", "httpd"),
            ("actions", "checkout"),
            ("my-org", "repo.with.dots"),
        ] {
            let entry = parse_entry(&format!("{}/{}", org, repo)).unwrap();
            assert_eq!(entry.kind, SourceKind::CodeHost);
            assert_eq!(entry.organization, org);
            assert_eq!(entry.repository, repo);
            assert_eq!(entry.tag, TagSpecifier::Wildcard);
        }
    }

    #[test]
    fn test_tag_specifiers() {
        let tag = |raw: &str| parse_entry(raw).unwrap().tag;
        assert_eq!(tag("apache/httpd@*"), TagSpecifier::Wildcard);
        assert_eq!(tag("apache/httpd@v2.*"), TagSpecifier::Wildcard);
        assert_eq!(tag("apache/httpd@latest"), TagSpecifier::Latest);
        assert_eq!(
            tag(&format!("apache/httpd@{}", SHA)),
            TagSpecifier::Pinned(SHA.to_string())
        );
        assert_eq!(
            tag("apache/httpd@v1.2.3"),
            TagSpecifier::Named("v1.2.3".to_string())
        );
        // 40 characters but not hex
        let not_hex = "z".repeat(40);
        assert_eq!(
            tag(&format!("apache/httpd@{}", not_hex)),
            TagSpecifier::Named(not_hex)
        );
    }

    #[test]
    fn test_trailing_segments_truncated() {
        let entry = parse_entry("github/codeql-action/init@v3").unwrap();
        assert_eq!(entry.identity().as_str(), "github/codeql-action");
        assert_eq!(entry.tag, TagSpecifier::Named("v3".to_string()));
    }

    #[test]
    fn test_malformed_entries() {
        assert!(matches!(
            parse_entry("apache"),
            Err(PatternError::MissingRepository { .. })
        ));
        assert!(matches!(
            parse_entry("apache@v1"),
            Err(PatternError::MissingRepository { .. })
        ));
        assert!(matches!(
            parse_entry("apache/*"),
            Err(PatternError::WildcardRepository { .. })
        ));
        assert!(matches!(
            parse_entry("/httpd"),
            Err(PatternError::EmptySegment { .. })
        ));
        assert!(matches!(
            parse_entry("apache/httpd@"),
            Err(PatternError::EmptySegment { .. })
        ));
        assert!(matches!(
            parse_entry("docker://"),
            Err(PatternError::MissingImage { .. })
        ));
    }

    #[test]
    fn test_registry_entries() {
        let entry = parse_entry("docker://library/nginx:latest").unwrap();
        assert_eq!(entry.kind, SourceKind::Registry);
        assert_eq!(entry.organization, "library");
        assert_eq!(entry.repository, "nginx");
        assert_eq!(entry.tag, TagSpecifier::Named("latest".to_string()));
        assert_eq!(entry.identity().as_str(), "docker://library/nginx");

        let untagged = parse_entry("docker://grafana/grafana").unwrap();
        assert_eq!(untagged.tag, TagSpecifier::Wildcard);

        let official = parse_entry("docker://alpine:3.20").unwrap();
        assert_eq!(official.identity().as_str(), "docker://library/alpine");
        assert_eq!(official.tag, TagSpecifier::Named("3.20".to_string()));

        let pinned = parse_entry("docker://library/nginx@sha256:abcd").unwrap();
        assert_eq!(pinned.tag, TagSpecifier::Pinned("sha256:abcd".to_string()));
    }

    #[test]
    fn test_bare_docker_prefix_is_a_registry_entry() {
        let entry = parse_entry("docker:library/nginx:latest").unwrap();
        assert_eq!(entry.kind, SourceKind::Registry);
        assert_eq!(entry.identity().as_str(), "docker://library/nginx");
        assert_eq!(entry.tag, TagSpecifier::Named("latest".to_string()));

        let official = parse_entry("docker:alpine").unwrap();
        assert_eq!(official.identity().as_str(), "docker://library/alpine");
        assert!(matches!(
            parse_entry("docker:"),
            Err(PatternError::MissingImage { .. })
        ));
    }

    #[test]
    fn test_colon_in_code_host_path_rejected() {
        assert!(matches!(
            parse_entry("oci:library/nginx:latest"),
            Err(PatternError::SchemeInPath { .. })
        ));
        assert!(matches!(
            parse_entry("apache/httpd:2.4@v1"),
            Err(PatternError::SchemeInPath { .. })
        ));
    }

    #[test]
    fn test_whitespace_trimmed() {
        let entry = parse_entry("  apache/httpd@v1.0 \n").unwrap();
        assert_eq!(entry.raw, "apache/httpd@v1.0");
        assert_eq!(entry.identity().to_string(), "apache/httpd");
    }
}

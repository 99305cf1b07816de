//! Change-event model
//!
//! Feed payloads are decoded once into [`FeedEvent`], then classified
//! against the watched document by [`ChangeFilter`].

use serde::Deserialize;
use serde_json::Value;

/// The `commit` object of a feed payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitNotice {
    pub project: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, alias = "sha")]
    pub hash: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
}

/// One decoded feed payload
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Commit(CommitNotice),
    /// Keep-alive payload without a `commit` key
    Heartbeat,
    /// Anything else, kept for logging
    Other(Value),
}

impl FeedEvent {
    pub fn from_value(value: Value) -> Self {
        match value.get("commit") {
            Some(commit) => match serde_json::from_value::<CommitNotice>(commit.clone()) {
                Ok(notice) => Self::Commit(notice),
                Err(_) => Self::Other(value),
            },
            None if value.is_object() => Self::Heartbeat,
            None => Self::Other(value),
        }
    }

    /// Decode one line of the feed
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Value>(line).map(Self::from_value)
    }
}

/// A feed event as it relates to the approved-pattern document
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A commit in the source project touched the document
    DocumentChanged(CommitNotice),
    Heartbeat,
    /// Commits elsewhere, or commits not touching the document
    Other,
}

/// Matches commits to the approved-pattern document of one project
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    project: String,
    path: String,
}

impl ChangeFilter {
    pub fn new(project: impl Into<String>, document_path: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            path: document_path.into(),
        }
    }

    pub fn classify(&self, event: &FeedEvent) -> ChangeEvent {
        match event {
            FeedEvent::Commit(notice)
                if notice.project == self.project
                    && notice.files.iter().any(|f| *f == self.path) =>
            {
                ChangeEvent::DocumentChanged(notice.clone())
            }
            FeedEvent::Heartbeat => ChangeEvent::Heartbeat,
            _ => ChangeEvent::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter() -> ChangeFilter {
        ChangeFilter::new("infrastructure-actions", "approved_patterns.yml")
    }

    #[test]
    fn test_decode_commit() {
        let event = FeedEvent::from_line(
            r#"{"commit": {"project": "infrastructure-actions", "hash": "abc", "ref": "refs/heads/main", "files": ["approved_patterns.yml", "README.md"]}}"#,
        )
        .unwrap();
        let FeedEvent::Commit(notice) = &event else {
            panic!("expected a commit, got {:?}", event);
        };
        assert_eq!(notice.project, "infrastructure-actions");
        assert_eq!(notice.hash.as_deref(), Some("abc"));
        assert_eq!(notice.files.len(), 2);
        assert!(matches!(filter().classify(&event), ChangeEvent::DocumentChanged(_)));
    }

    #[test]
    fn test_heartbeat_and_other() {
        assert_eq!(
            FeedEvent::from_value(json!({"stillalive": 1700000000.0})),
            FeedEvent::Heartbeat
        );
        assert_eq!(filter().classify(&FeedEvent::Heartbeat), ChangeEvent::Heartbeat);
        assert!(matches!(
            FeedEvent::from_value(json!("ping")),
            FeedEvent::Other(_)
        ));
        // commit without a project is not a usable notice
        assert!(matches!(
            FeedEvent::from_value(json!({"commit": {"files": []}})),
            FeedEvent::Other(_)
        ));
        assert!(FeedEvent::from_line("not json").is_err());
    }

    #[test]
    fn test_other_files_and_projects_ignored() {
        let commit = |project: &str, files: &[&str]| {
            FeedEvent::Commit(CommitNotice {
                project: project.to_string(),
                files: files.iter().map(|f| f.to_string()).collect(),
                hash: None,
                git_ref: None,
            })
        };
        let filter = filter();
        assert_eq!(
            filter.classify(&commit("infrastructure-actions", &["README.md"])),
            ChangeEvent::Other
        );
        assert_eq!(
            filter.classify(&commit("infrastructure-actions", &[])),
            ChangeEvent::Other
        );
        assert_eq!(
            filter.classify(&commit("other-project", &["approved_patterns.yml"])),
            ChangeEvent::Other
        );
        // exact path only; the dot is literal
        assert_eq!(
            filter.classify(&commit(
                "infrastructure-actions",
                &["docs/approved_patterns.yml", "approved_patternsXyml"]
            )),
            ChangeEvent::Other
        );
    }
}

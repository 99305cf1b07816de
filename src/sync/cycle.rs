//! One synchronization cycle
//!
//! fetch document → parse entries → resolve (bounded, order-preserving) →
//! aggregate → push. Per-entry failures are logged and skipped; a document
//! or boundary failure fails the cycle.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};

use super::synchronizer::PolicySynchronizer;
use crate::allowlist::{Allowlist, AllowlistAggregator, CycleReport};
use crate::config::{AllowlistConfig, ExpirationConfig, WildcardPolicy};
use crate::error::{CycleError, DocumentError};
use crate::pattern::parse_entry;
use crate::resolve::{CodeHost, Expirations, ImageRegistry, ReferenceResolver};
use crate::source::{parse_document, DocumentSource};
use crate::sync::boundary::SelectedActions;

/// Whether a cycle crosses the authorization boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Push,
    /// Build and report the update without sending it
    DryRun,
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub allowlist: Allowlist,
    pub report: CycleReport,
    pub update: SelectedActions,
    pub pushed: bool,
}

pub struct SyncCycle {
    source: Box<dyn DocumentSource>,
    code_host: Arc<dyn CodeHost>,
    registry: Arc<dyn ImageRegistry>,
    synchronizer: PolicySynchronizer,
    expiration: ExpirationConfig,
    wildcard: WildcardPolicy,
    verify_pinned: bool,
    concurrency: usize,
    today: Option<NaiveDate>,
}

impl SyncCycle {
    pub fn new(
        config: &AllowlistConfig,
        source: Box<dyn DocumentSource>,
        code_host: Arc<dyn CodeHost>,
        registry: Arc<dyn ImageRegistry>,
        synchronizer: PolicySynchronizer,
    ) -> Self {
        Self {
            source,
            code_host,
            registry,
            synchronizer,
            expiration: config.expiration.clone(),
            wildcard: config.policy.wildcard,
            verify_pinned: config.policy.verify_pinned_commits,
            concurrency: config.http.concurrency.max(1),
            today: None,
        }
    }

    /// Fix the date used for expirations instead of reading the clock
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn synchronizer(&self) -> &PolicySynchronizer {
        &self.synchronizer
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn resolver(&self, today: NaiveDate) -> ReferenceResolver {
        let expirations = Expirations {
            pinned: self.expiration.default,
            review: self.expiration.review_date(today),
        };
        ReferenceResolver::new(self.code_host.clone(), self.registry.clone(), expirations)
            .with_wildcard_policy(self.wildcard)
            .with_pinned_verification(self.verify_pinned)
    }

    /// Fetch, parse, resolve and aggregate the approved-pattern document
    pub async fn build_allowlist(&self) -> Result<(Allowlist, CycleReport), DocumentError> {
        let today = self.today();
        let text = self.source.fetch().await.map_err(|e| {
            tracing::error!(source = %self.source.describe(), error = %e, "Could not load approved patterns");
            e
        })?;
        let lines = parse_document(&text)?;
        tracing::debug!(source = %self.source.describe(), lines = lines.len(), "Loaded approved patterns");

        let mut aggregator = AllowlistAggregator::new();
        for item in &lines.invalid {
            tracing::warn!(item = %item, "Skipping malformed entry (not a string)");
            aggregator.record_malformed();
        }
        let mut entries = Vec::with_capacity(lines.entries.len());
        for line in &lines.entries {
            match parse_entry(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed entry");
                    aggregator.record_malformed();
                }
            }
        }

        let resolver = self.resolver(today);
        let resolver = &resolver;
        // `buffered` keeps document order, so the fold below stays deterministic
        let mut results = stream::iter(entries.iter())
            .map(|entry| async move { (entry.identity(), resolver.resolve(entry).await) })
            .buffered(self.concurrency);
        while let Some((identity, resolved)) = results.next().await {
            aggregator.add(&identity, resolved);
        }

        Ok(aggregator.finish())
    }

    pub async fn run(&self, mode: RunMode) -> Result<CycleOutcome, CycleError> {
        let today = self.today();
        let (allowlist, report) = self.build_allowlist().await?;

        // a document whose every entry failed would otherwise wipe the policy
        let nothing_resolved = report.entries > 0 && report.resolved == 0;
        let (update, pushed) = match mode {
            RunMode::Push if nothing_resolved => {
                tracing::warn!(
                    entries = report.entries,
                    malformed = report.malformed,
                    unresolved = report.unresolved,
                    "No entry resolved, keeping the current policy"
                );
                (self.synchronizer.payload(&allowlist, today), false)
            }
            RunMode::Push => (self.synchronizer.push(&allowlist, today).await?, true),
            RunMode::DryRun => (self.synchronizer.payload(&allowlist, today), false),
        };

        tracing::info!(
            entries = report.entries,
            resolved = report.resolved,
            skipped = report.skipped(),
            sources = allowlist.len(),
            patterns = update.patterns_allowed.len(),
            pushed,
            "Synchronization cycle complete"
        );

        Ok(CycleOutcome {
            allowlist,
            report,
            update,
            pushed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::GitRef;
    use crate::testing::{FakeBoundary, FakeCodeHost, FakeDocument, FakeRegistry};
    use crate::watch::events::ChangeFilter;

    const SHA_V1: &str = "1111111111111111111111111111111111111111";

    fn config() -> AllowlistConfig {
        AllowlistConfig::from_yaml(
            "organization: apache\nsource:\n  project: infrastructure-actions\nhttp:\n  concurrency: 2\n",
        )
        .unwrap()
    }

    fn cycle(document: &str, boundary: Arc<FakeBoundary>) -> SyncCycle {
        let code_host = FakeCodeHost::new().with_tags(
            "apache/httpd",
            vec![GitRef::commit("refs/tags/v1.0", SHA_V1)],
        );
        let synchronizer = PolicySynchronizer::new(
            boundary,
            ChangeFilter::new("infrastructure-actions", "approved_patterns.yml"),
        );
        SyncCycle::new(
            &config(),
            Box::new(FakeDocument::new(document)),
            Arc::new(code_host),
            Arc::new(FakeRegistry::new()),
            synchronizer,
        )
        .with_today(NaiveDate::from_ymd_opt(2026, 10, 14).unwrap())
    }

    #[tokio::test]
    async fn test_report_counts_each_line() {
        let boundary = Arc::new(FakeBoundary::new());
        let doc = "- apache/httpd@v1.0\n- apache\n- apache/httpd@v9\n- apache/httpd@*\n";
        let (allowlist, report) = cycle(doc, boundary).build_allowlist().await.unwrap();

        assert_eq!(report.entries, 4);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.resolved, 2);
        assert_eq!(allowlist.len(), 1);
        assert_eq!(allowlist.reference_count(), 3);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_push() {
        let boundary = Arc::new(FakeBoundary::new());
        let outcome = cycle("- apache/httpd@v1.0\n", boundary.clone())
            .run(RunMode::DryRun)
            .await
            .unwrap();
        assert!(!outcome.pushed);
        assert_eq!(outcome.update.patterns_allowed.len(), 2);
        assert!(boundary.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_document_fails_cycle() {
        let boundary = Arc::new(FakeBoundary::new());
        let result = cycle("key: value\n", boundary.clone()).run(RunMode::Push).await;
        assert!(matches!(result, Err(CycleError::Document(_))));
        assert!(boundary.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_non_string_items_count_as_malformed() {
        let boundary = Arc::new(FakeBoundary::new());
        let doc = "- apache/httpd@v1.0\n-\n- 1.0\n- apache/ant: v1\n";
        let outcome = cycle(doc, boundary.clone()).run(RunMode::Push).await.unwrap();

        assert_eq!(outcome.report.entries, 4);
        assert_eq!(outcome.report.malformed, 3);
        assert_eq!(outcome.report.resolved, 1);
        assert!(outcome.pushed);
        assert_eq!(boundary.pushes().len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_resolved_skips_push() {
        let boundary = Arc::new(FakeBoundary::new());
        let doc = "- apache\n- apache/httpd@v404\n- 42\n";
        let outcome = cycle(doc, boundary.clone()).run(RunMode::Push).await.unwrap();

        assert_eq!(outcome.report.entries, 3);
        assert_eq!(outcome.report.resolved, 0);
        assert!(!outcome.pushed);
        assert!(outcome.update.patterns_allowed.is_empty());
        assert!(boundary.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_empty_document_still_pushes() {
        let boundary = Arc::new(FakeBoundary::new());
        let outcome = cycle("", boundary.clone()).run(RunMode::Push).await.unwrap();

        assert_eq!(outcome.report.entries, 0);
        assert!(outcome.pushed);
        assert_eq!(boundary.pushes().len(), 1);
    }
}

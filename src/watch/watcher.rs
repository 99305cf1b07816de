//! Change watcher
//!
//! Listens to the commit feed and runs one synchronization cycle per change
//! to the approved-pattern document. Cycles are awaited inline, so at most
//! one is ever in flight.

use std::future::Future;
use std::time::Duration;

use super::pubsub::EventSource;
use crate::sync::{RunMode, SyncCycle};

/// Counters reported when the watcher stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub events: usize,
    pub cycles: usize,
    pub failures: usize,
}

pub struct ChangeWatcher {
    feed: Box<dyn EventSource>,
    reconnect: Duration,
}

impl ChangeWatcher {
    pub fn new(feed: Box<dyn EventSource>, reconnect: Duration) -> Self {
        Self { feed, reconnect }
    }

    /// Watch until `shutdown` resolves.
    ///
    /// Shutdown is only observed between cycles; a cycle already running is
    /// allowed to finish.
    pub async fn run<F>(&mut self, cycle: &SyncCycle, shutdown: F) -> WatchSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut summary = WatchSummary::default();

        loop {
            // shutdown is polled first so a pending stop beats queued events
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = self.feed.next_event() => next,
            };

            match next {
                Ok(Some(event)) => {
                    summary.events += 1;
                    if !cycle.synchronizer().should_resync(&event) {
                        continue;
                    }
                    summary.cycles += 1;
                    if let Err(e) = cycle.run(RunMode::Push).await {
                        summary.failures += 1;
                        tracing::error!(error = %e, "Synchronization cycle failed");
                    }
                }
                Ok(None) => {
                    tracing::warn!(delay = ?self.reconnect, "Commit feed closed, reconnecting");
                    if self.pause(&mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, delay = ?self.reconnect, "Commit feed error, reconnecting");
                    if self.pause(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            events = summary.events,
            cycles = summary.cycles,
            failures = summary.failures,
            "Watcher stopped"
        );
        summary
    }

    /// Sleep before reconnecting; true if shutdown arrived meanwhile
    async fn pause<F>(&self, shutdown: &mut std::pin::Pin<&mut F>) -> bool
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = shutdown.as_mut() => true,
            _ = tokio::time::sleep(self.reconnect) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use tokio::sync::oneshot;

    use super::*;
    use crate::config::AllowlistConfig;
    use crate::error::FeedError;
    use crate::resolve::GitRef;
    use crate::sync::PolicySynchronizer;
    use crate::testing::{FakeBoundary, FakeCodeHost, FakeDocument, FakeEventSource, FakeRegistry};
    use crate::watch::events::{CommitNotice, FeedEvent};

    fn cycle(boundary: Arc<FakeBoundary>) -> SyncCycle {
        let config = AllowlistConfig::from_yaml(
            "organization: apache\nsource:\n  project: infrastructure-actions\n",
        )
        .unwrap();
        let code_host = FakeCodeHost::new().with_tags(
            "apache/httpd",
            vec![GitRef::commit("refs/tags/v1.0", "1".repeat(40))],
        );
        SyncCycle::new(
            &config,
            Box::new(FakeDocument::new("- apache/httpd@v1.0\n")),
            Arc::new(code_host),
            Arc::new(FakeRegistry::new()),
            PolicySynchronizer::from_config(&config, boundary),
        )
        .with_today(NaiveDate::from_ymd_opt(2026, 10, 14).unwrap())
    }

    fn commit(project: &str, files: &[&str]) -> FeedEvent {
        FeedEvent::Commit(CommitNotice {
            project: project.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            hash: None,
            git_ref: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_document_changes_trigger_cycles() {
        let boundary = Arc::new(FakeBoundary::new());
        let cycle = cycle(boundary.clone());
        let feed = FakeEventSource::new(vec![
            Ok(Some(FeedEvent::Heartbeat)),
            Ok(Some(commit("infrastructure-actions", &["README.md"]))),
            Ok(Some(commit("other", &["approved_patterns.yml"]))),
            Ok(Some(commit("infrastructure-actions", &["approved_patterns.yml"]))),
        ]);
        let mut watcher = ChangeWatcher::new(Box::new(feed), Duration::from_secs(10));

        // the fake feed parks once drained, so a delayed shutdown ends the run
        let summary = watcher
            .run(&cycle, tokio::time::sleep(Duration::from_secs(60)))
            .await;

        assert_eq!(summary.events, 4);
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.failures, 0);
        assert_eq!(boundary.pushes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_feed_errors() {
        let boundary = Arc::new(FakeBoundary::rejecting(500));
        let cycle = cycle(boundary.clone());
        let feed = FakeEventSource::new(vec![
            Err(FeedError::Stream("reset by peer".to_string())),
            Ok(None),
            Ok(Some(commit("infrastructure-actions", &["approved_patterns.yml"]))),
        ]);
        let mut watcher = ChangeWatcher::new(Box::new(feed), Duration::from_secs(1));

        let summary = watcher
            .run(&cycle, tokio::time::sleep(Duration::from_secs(60)))
            .await;

        assert_eq!(summary.events, 1);
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(boundary.pushes().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_watcher() {
        let boundary = Arc::new(FakeBoundary::new());
        let cycle = cycle(boundary.clone());
        let mut watcher =
            ChangeWatcher::new(Box::new(FakeEventSource::new(Vec::new())), Duration::from_secs(1));

        let (tx, rx) = oneshot::channel::<()>();
        tx.send(()).unwrap();
        let summary = watcher
            .run(&cycle, async {
                let _ = rx.await;
            })
            .await;

        assert_eq!(summary, WatchSummary::default());
        assert!(boundary.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_pending_shutdown_wins_over_queued_events() {
        let boundary = Arc::new(FakeBoundary::new());
        let cycle = cycle(boundary.clone());
        let feed = FakeEventSource::new(vec![
            Ok(Some(commit("infrastructure-actions", &["approved_patterns.yml"]))),
            Ok(Some(commit("infrastructure-actions", &["approved_patterns.yml"]))),
        ]);
        let mut watcher = ChangeWatcher::new(Box::new(feed), Duration::from_secs(1));

        let summary = watcher.run(&cycle, std::future::ready(())).await;

        assert_eq!(summary, WatchSummary::default());
        assert!(boundary.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_reconnect_delay() {
        // an hour-long delay would hang the test unless shutdown is seen first
        let watcher =
            ChangeWatcher::new(Box::new(FakeEventSource::new(Vec::new())), Duration::from_secs(3600));

        let (tx, rx) = oneshot::channel::<()>();
        let shutdown = async move {
            let _ = rx.await;
        };
        tokio::pin!(shutdown);
        tx.send(()).unwrap();
        assert!(watcher.pause(&mut shutdown).await);
    }
}

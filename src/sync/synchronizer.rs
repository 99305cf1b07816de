//! Policy synchronizer
//!
//! Turns an aggregated allowlist into the selected-actions payload and
//! pushes it across the authorization boundary. Also decides which feed
//! events warrant a fresh cycle.

use std::sync::Arc;

use chrono::NaiveDate;

use super::boundary::{PolicyBoundary, SelectedActions};
use crate::allowlist::Allowlist;
use crate::config::AllowlistConfig;
use crate::error::SyncError;
use crate::watch::events::{ChangeEvent, ChangeFilter, FeedEvent};

pub struct PolicySynchronizer {
    boundary: Arc<dyn PolicyBoundary>,
    github_owned_allowed: bool,
    verified_allowed: bool,
    filter: ChangeFilter,
}

impl PolicySynchronizer {
    pub fn new(boundary: Arc<dyn PolicyBoundary>, filter: ChangeFilter) -> Self {
        Self {
            boundary,
            github_owned_allowed: true,
            verified_allowed: true,
            filter,
        }
    }

    pub fn from_config(config: &AllowlistConfig, boundary: Arc<dyn PolicyBoundary>) -> Self {
        let filter = ChangeFilter::new(config.source.project.clone(), config.source.path.clone());
        let mut synchronizer = Self::new(boundary, filter);
        synchronizer.github_owned_allowed = config.policy.github_owned_allowed;
        synchronizer.verified_allowed = config.policy.verified_allowed;
        synchronizer
    }

    /// Build the update for `allowlist` as of `today`
    pub fn payload(&self, allowlist: &Allowlist, today: NaiveDate) -> SelectedActions {
        SelectedActions {
            github_owned_allowed: self.github_owned_allowed,
            verified_allowed: self.verified_allowed,
            patterns_allowed: allowlist.patterns(today),
        }
    }

    /// Replace the remote pattern list with the one derived from `allowlist`
    pub async fn push(
        &self,
        allowlist: &Allowlist,
        today: NaiveDate,
    ) -> Result<SelectedActions, SyncError> {
        let update = self.payload(allowlist, today);
        match self.boundary.update_selected_actions(&update).await {
            Ok(()) => {
                tracing::info!(
                    patterns = update.patterns_allowed.len(),
                    "Updated selected-actions policy"
                );
                Ok(update)
            }
            Err(e) => {
                match &e {
                    SyncError::Rejected { status, .. } => {
                        tracing::error!(status, error = %e, "Selected-actions update rejected")
                    }
                    SyncError::Transport(_) => {
                        tracing::error!(error = %e, "Selected-actions update failed")
                    }
                }
                Err(e)
            }
        }
    }

    /// True when the event is a commit touching the approved-pattern document
    pub fn should_resync(&self, event: &FeedEvent) -> bool {
        match self.filter.classify(event) {
            ChangeEvent::DocumentChanged(notice) => {
                tracing::info!(
                    project = %notice.project,
                    hash = notice.hash.as_deref().unwrap_or("unknown"),
                    "Approved patterns changed"
                );
                true
            }
            ChangeEvent::Heartbeat => {
                tracing::info!("Heartbeat signal detected");
                false
            }
            ChangeEvent::Other => false,
        }
    }
}

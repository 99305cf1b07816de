//! Authorization boundary
//!
//! The organization's selected-actions policy. Updates replace the whole
//! pattern list in one call.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::AllowlistConfig;
use crate::error::{ConfigError, SyncError};
use crate::http::{truncate_body, ApiClient};
use crate::resolve::github::github_headers;

/// Body of `PUT /orgs/{org}/actions/permissions/selected-actions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedActions {
    pub github_owned_allowed: bool,
    pub verified_allowed: bool,
    pub patterns_allowed: Vec<String>,
}

/// Remote policy endpoint that enforces which actions may run
#[async_trait]
pub trait PolicyBoundary: Send + Sync {
    async fn update_selected_actions(&self, update: &SelectedActions) -> Result<(), SyncError>;
}

pub struct GitHubPolicyBoundary {
    api: ApiClient,
    url: String,
}

impl GitHubPolicyBoundary {
    pub fn new(api: ApiClient, api_base: &str, organization: &str) -> Self {
        Self {
            api,
            url: selected_actions_url(api_base, organization),
        }
    }

    pub fn from_config(config: &AllowlistConfig) -> Result<Self, ConfigError> {
        let token = config.github_token()?;
        let api = ApiClient::new(&config.http, github_headers(&token))?;
        Ok(Self::new(
            api,
            &config.github.api_base,
            &config.organization,
        ))
    }
}

fn selected_actions_url(api_base: &str, organization: &str) -> String {
    format!(
        "{}/orgs/{}/actions/permissions/selected-actions",
        api_base.trim_end_matches('/'),
        organization
    )
}

#[async_trait]
impl PolicyBoundary for GitHubPolicyBoundary {
    async fn update_selected_actions(&self, update: &SelectedActions) -> Result<(), SyncError> {
        let response = self.api.put_json(&self.url, update).await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Rejected {
            status: status.as_u16(),
            body: truncate_body(&body),
        })
    }
}

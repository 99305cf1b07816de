//! Docker Hub tag listing
//!
//! Follows the `next` link until every page of tags has been read.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use super::traits::{ImageRegistry, ImageTag};
use crate::config::AllowlistConfig;
use crate::error::{ConfigError, HttpError};
use crate::http::{insert_bearer, insert_header, ApiClient};

const PAGE_SIZE: usize = 100;
/// Safety limit on pages followed for a single image
const MAX_PAGES: usize = 200;

/// One page of `GET /v2/repositories/{namespace}/{image}/tags/`
#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<ImageTag>,
}

pub struct DockerHubClient {
    api: ApiClient,
    api_base: String,
}

impl DockerHubClient {
    pub fn new(api: ApiClient, api_base: impl Into<String>) -> Self {
        Self {
            api,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &AllowlistConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "accept", "application/json");
        if let Some(token) = config.registry_token()? {
            insert_bearer(&mut headers, &token);
        }
        let api = ApiClient::new(&config.http, headers)?;
        Ok(Self::new(api, config.registry.api_base.clone()))
    }

    fn first_page_url(&self, namespace: &str, image: &str) -> String {
        format!(
            "{}/repositories/{}/{}/tags/?page_size={}",
            self.api_base, namespace, image, PAGE_SIZE
        )
    }
}

#[async_trait]
impl ImageRegistry for DockerHubClient {
    async fn list_tags(&self, namespace: &str, image: &str) -> Result<Vec<ImageTag>, HttpError> {
        let mut tags = Vec::new();
        let mut next = Some(self.first_page_url(namespace, image));
        let mut pages = 0;

        while let Some(url) = next {
            if pages == MAX_PAGES {
                tracing::warn!(
                    image = %format!("{}/{}", namespace, image),
                    pages,
                    "Stopping tag listing at page limit"
                );
                break;
            }
            tracing::debug!(%url, "Fetching image tags");
            let page: TagPage = self.api.get_json(&url).await?;
            tags.extend(page.results);
            next = page.next.filter(|n| !n.is_empty());
            pages += 1;
        }

        Ok(tags)
    }
}

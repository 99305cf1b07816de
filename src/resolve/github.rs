//! GitHub REST client
//!
//! Lists tag and branch references, repository metadata and annotated tag
//! objects. Reference listings are paginated with `per_page=100`.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use super::traits::{CodeHost, GitObject, GitRef};
use crate::config::AllowlistConfig;
use crate::error::{ConfigError, HttpError};
use crate::http::{insert_bearer, insert_header, ApiClient};

const PAGE_SIZE: usize = 100;
const GITHUB_API_VERSION: &str = "2022-11-28";
/// Annotated tags can point at other tags; stop following after this many
const MAX_TAG_DEPTH: usize = 5;

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct TagObject {
    object: GitObject,
}

/// Default headers for GitHub API calls
pub fn github_headers(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "accept", "application/vnd.github+json");
    insert_header(&mut headers, "x-github-api-version", GITHUB_API_VERSION);
    insert_bearer(&mut headers, token);
    headers
}

pub struct GitHubClient {
    api: ApiClient,
    api_base: String,
}

impl GitHubClient {
    pub fn new(api: ApiClient, api_base: impl Into<String>) -> Self {
        Self {
            api,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build from configuration, reading the token from its environment
    /// variable
    pub fn from_config(config: &AllowlistConfig) -> Result<Self, ConfigError> {
        let token = config.github_token()?;
        let api = ApiClient::new(&config.http, github_headers(&token))?;
        Ok(Self::new(api, config.github.api_base.clone()))
    }

    fn repo_url(&self, org: &str, repo: &str) -> String {
        format!("{}/repos/{}/{}", self.api_base, org, repo)
    }

    /// Fetch every page of `git/refs/<prefix>`. GitHub answers 404 when a
    /// repository has no refs under the prefix.
    async fn list_refs(
        &self,
        org: &str,
        repo: &str,
        prefix: &str,
    ) -> Result<Vec<GitRef>, HttpError> {
        let mut all_refs = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/git/refs/{}?per_page={}&page={}",
                self.repo_url(org, repo),
                prefix,
                PAGE_SIZE,
                page
            );
            tracing::debug!(%url, "Fetching refs");
            let Some(refs) = self.api.get_json_optional::<Vec<GitRef>>(&url).await? else {
                break;
            };

            let count = refs.len();
            all_refs.extend(refs);

            // A short page is the last one
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(all_refs)
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn tag_refs(&self, org: &str, repo: &str) -> Result<Vec<GitRef>, HttpError> {
        self.list_refs(org, repo, "tags").await
    }

    async fn head_refs(&self, org: &str, repo: &str) -> Result<Vec<GitRef>, HttpError> {
        self.list_refs(org, repo, "heads").await
    }

    async fn default_branch(&self, org: &str, repo: &str) -> Result<String, HttpError> {
        let info: RepositoryInfo = self.api.get_json(&self.repo_url(org, repo)).await?;
        Ok(info.default_branch)
    }

    async fn peel_tag(&self, org: &str, repo: &str, tag_sha: &str) -> Result<String, HttpError> {
        let mut sha = tag_sha.to_string();
        for _ in 0..MAX_TAG_DEPTH {
            let url = format!("{}/git/tags/{}", self.repo_url(org, repo), sha);
            let tag: TagObject = self.api.get_json(&url).await?;
            if tag.object.kind != "tag" {
                return Ok(tag.object.sha);
            }
            sha = tag.object.sha;
        }
        Err(HttpError::Decode {
            url: format!("{}/git/tags/{}", self.repo_url(org, repo), tag_sha),
            message: format!("tag chain deeper than {} levels", MAX_TAG_DEPTH),
        })
    }

    async fn commit_exists(&self, org: &str, repo: &str, sha: &str) -> Result<bool, HttpError> {
        let url = format!("{}/commits/{}", self.repo_url(org, repo), sha);
        match self.api.get_json_optional::<serde_json::Value>(&url).await {
            Ok(found) => Ok(found.is_some()),
            // GitHub answers 422 for a hash that names no object
            Err(HttpError::Status { status: 422, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_refs_listing() {
        let body = r#"[
            {
                "ref": "refs/tags/v1.0",
                "node_id": "MDM6UmVmcmVmcy90YWdzL3YxLjA=",
                "url": "https://api.github.com/repos/apache/httpd/git/refs/tags/v1.0",
                "object": {
                    "sha": "aa218f56b14c9653891f9e74264a383fa43fefbd",
                    "type": "commit",
                    "url": "https://api.github.com/repos/apache/httpd/git/commits/aa218f56b14c9653891f9e74264a383fa43fefbd"
                }
            },
            {
                "ref": "refs/tags/v2.0",
                "object": { "sha": "bb218f56b14c9653891f9e74264a383fa43fefbd", "type": "tag" }
            }
        ]"#;
        let refs: Vec<GitRef> = serde_json::from_str(body).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(
            refs[0],
            GitRef::commit("refs/tags/v1.0", "aa218f56b14c9653891f9e74264a383fa43fefbd")
        );
        assert!(!refs[0].is_annotated_tag());
        assert!(refs[1].is_annotated_tag());
    }

    #[test]
    fn test_decode_repository_and_tag_object() {
        let repo: RepositoryInfo =
            serde_json::from_str(r#"{"name": "httpd", "default_branch": "trunk"}"#).unwrap();
        assert_eq!(repo.default_branch, "trunk");

        let tag: TagObject = serde_json::from_str(
            r#"{"tag": "v2.0", "object": {"sha": "cc218f56b14c9653891f9e74264a383fa43fefbd", "type": "commit"}}"#,
        )
        .unwrap();
        assert_eq!(tag.object.kind, "commit");
    }

    #[test]
    fn test_headers_and_urls() {
        let headers = github_headers("token");
        assert_eq!(headers["accept"], "application/vnd.github+json");
        assert_eq!(headers["x-github-api-version"], GITHUB_API_VERSION);

        let api = ApiClient::new(&Default::default(), headers).unwrap();
        let client = GitHubClient::new(api, "https://api.github.com/");
        assert_eq!(
            client.repo_url("apache", "httpd"),
            "https://api.github.com/repos/apache/httpd"
        );
    }

    mod against_stub {
        use super::*;
        use crate::config::HttpConfig;
        use crate::testing::StubServer;

        fn client(server: &StubServer) -> GitHubClient {
            let config = HttpConfig {
                retry_base_ms: 1,
                ..Default::default()
            };
            let api = ApiClient::new(&config, github_headers("token")).unwrap();
            GitHubClient::new(api, server.base())
        }

        fn refs_page(prefix: &str, start: usize, count: usize) -> String {
            let refs: Vec<serde_json::Value> = (start..start + count)
                .map(|i| {
                    serde_json::json!({
                        "ref": format!("refs/{}/v{}", prefix, i),
                        "object": { "sha": format!("{:040x}", i), "type": "commit" }
                    })
                })
                .collect();
            serde_json::Value::Array(refs).to_string()
        }

        #[tokio::test]
        async fn test_short_page_ends_listing() {
            let server = StubServer::start(|req| {
                if req.target.ends_with("page=1") {
                    (200, refs_page("tags", 0, PAGE_SIZE))
                } else {
                    (200, refs_page("tags", PAGE_SIZE, 1))
                }
            })
            .await
            .unwrap();

            let refs = client(&server).tag_refs("apache", "httpd").await.unwrap();
            assert_eq!(refs.len(), PAGE_SIZE + 1);
            assert_eq!(refs[PAGE_SIZE].name, format!("refs/tags/v{}", PAGE_SIZE));
            assert_eq!(
                server.targets(),
                vec![
                    "/repos/apache/httpd/git/refs/tags?per_page=100&page=1".to_string(),
                    "/repos/apache/httpd/git/refs/tags?per_page=100&page=2".to_string(),
                ]
            );
        }

        #[tokio::test]
        async fn test_missing_refs_prefix_is_empty() {
            let server = StubServer::start(|_| (404, r#"{"message": "Not Found"}"#.to_string()))
                .await
                .unwrap();
            let refs = client(&server).head_refs("apache", "empty").await.unwrap();
            assert!(refs.is_empty());
            assert_eq!(server.hits(), 1);
        }

        #[tokio::test]
        async fn test_unknown_commit_is_absent() {
            let server = StubServer::start(|_| (422, r#"{"message": "No commit found"}"#.to_string()))
                .await
                .unwrap();
            let found = client(&server)
                .commit_exists("apache", "httpd", &"0".repeat(40))
                .await
                .unwrap();
            assert!(!found);
        }
    }
}

//! Shared HTTP plumbing
//!
//! Every upstream client (GitHub, Docker Hub, the pub/sub feed) goes through
//! [`ApiClient`], which applies request timeouts, default headers and bounded
//! retry with exponential backoff for transient failures.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::sleep;

use crate::config::HttpConfig;
use crate::error::HttpError;

const USER_AGENT: &str = concat!("gha-allowlist/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY_CHARS: usize = 200;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// HTTP client with default headers and retry policy
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    max_retries: u32,
    retry_base: Duration,
}

impl ApiClient {
    /// Client for request/response APIs; every request carries the
    /// configured timeout
    pub fn new(config: &HttpConfig, headers: HeaderMap) -> Result<Self, HttpError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(HttpError::Client)?;
        Ok(Self::from_parts(http, config))
    }

    /// Client for long-lived streams; only connecting is time-bounded
    pub fn streaming(config: &HttpConfig, headers: HeaderMap) -> Result<Self, HttpError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(config.timeout())
            .build()
            .map_err(HttpError::Client)?;
        Ok(Self::from_parts(http, config))
    }

    fn from_parts(http: Client, config: &HttpConfig) -> Self {
        Self {
            http,
            max_retries: config.max_retries,
            retry_base: config.retry_base(),
        }
    }

    /// GET and decode a JSON body; non-success statuses are errors
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let response = self.send(url, || self.http.get(url)).await?;
        let response = check_status(response, url).await?;
        decode_json(response, url).await
    }

    /// Like [`get_json`](Self::get_json) but maps 404 to `None`
    pub async fn get_json_optional<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, HttpError> {
        let response = self.send(url, || self.http.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, url).await?;
        decode_json(response, url).await.map(Some)
    }

    /// GET a text body
    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let response = self.send(url, || self.http.get(url)).await?;
        let response = check_status(response, url).await?;
        response.text().await.map_err(|source| HttpError::Request {
            url: url.to_string(),
            source,
        })
    }

    /// PUT a JSON body and hand back the raw response, whatever its status
    pub async fn put_json<B: Serialize>(&self, url: &str, body: &B) -> Result<Response, HttpError> {
        self.send(url, || self.http.put(url).json(body)).await
    }

    /// Open a GET whose body is consumed incrementally
    pub async fn open_stream(&self, url: &str) -> Result<Response, HttpError> {
        let response = self.send(url, || self.http.get(url)).await?;
        check_status(response, url).await
    }

    /// Send with retry on transient failures. The last response is returned
    /// once retries run out, so callers still see the final status.
    async fn send<F>(&self, url: &str, build: F) -> Result<Response, HttpError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if attempt < self.max_retries && is_retryable_status(status) {
                        let delay = self.backoff(attempt);
                        tracing::debug!(
                            %url,
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            max_retries = self.max_retries,
                            ?delay,
                            "Transient HTTP status, retrying"
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(source) => {
                    let err = HttpError::Request {
                        url: url.to_string(),
                        source,
                    };
                    if attempt < self.max_retries && err.is_transient() {
                        let delay = self.backoff(attempt);
                        tracing::debug!(
                            %url,
                            error = %err,
                            attempt = attempt + 1,
                            max_retries = self.max_retries,
                            ?delay,
                            "Transport error, retrying"
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        exponential_backoff(self.retry_base, attempt)
    }
}

/// `base * 2^attempt`, capped
pub fn exponential_backoff(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(2u32.saturating_pow(attempt))
        .map(|d| d.min(MAX_BACKOFF))
        .unwrap_or(MAX_BACKOFF)
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Turn a non-success response into [`HttpError::Status`]
pub async fn check_status(response: Response, url: &str) -> Result<Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HttpError::Status {
        status: status.as_u16(),
        url: url.to_string(),
        body: truncate_body(&body),
    })
}

async fn decode_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, HttpError> {
    let text = response.text().await.map_err(|source| HttpError::Request {
        url: url.to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|e| HttpError::Decode {
        url: url.to_string(),
        message: format!("{} (first chars: {})", e, truncate_body(&text)),
    })
}

pub fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Insert a header, skipping values that are not valid header text
pub fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => tracing::warn!(header = name, "Ignoring invalid header value"),
    }
}

/// Insert a bearer `Authorization` header, marked sensitive
pub fn insert_bearer(headers: &mut HeaderMap, token: &str) {
    match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Err(_) => tracing::warn!("Ignoring token that is not valid header text"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let base = Duration::from_millis(500);
        assert_eq!(exponential_backoff(base, 0), Duration::from_millis(500));
        assert_eq!(exponential_backoff(base, 1), Duration::from_millis(1000));
        assert_eq!(exponential_backoff(base, 3), Duration::from_millis(4000));
        assert_eq!(exponential_backoff(base, 40), MAX_BACKOFF);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::NO_CONTENT));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(500);
        assert_eq!(truncate_body(&long).len(), MAX_ERROR_BODY_CHARS);
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn test_headers() {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "x-github-api-version", "2022-11-28");
        insert_bearer(&mut headers, "secret");
        insert_header(&mut headers, "accept", "bad\nvalue");
        assert_eq!(headers["x-github-api-version"], "2022-11-28");
        assert!(headers[AUTHORIZATION].is_sensitive());
        assert!(!headers.contains_key("accept"));
    }

    mod against_stub {
        use super::*;
        use crate::testing::StubServer;

        fn fast_retries() -> HttpConfig {
            HttpConfig {
                retry_base_ms: 1,
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn test_transient_status_retried_until_success() {
            let server = StubServer::start(|req| match req.index {
                0 => (503, "{\"message\":\"busy\"}".to_string()),
                _ => (200, "{\"default_branch\":\"trunk\"}".to_string()),
            })
            .await
            .unwrap();
            let api = ApiClient::new(&fast_retries(), HeaderMap::new()).unwrap();

            let body: serde_json::Value = api.get_json(&server.url("/repos/apache/httpd")).await.unwrap();
            assert_eq!(body["default_branch"], "trunk");
            assert_eq!(server.hits(), 2);
        }

        #[tokio::test]
        async fn test_retries_exhausted_returns_last_status() {
            let server = StubServer::start(|_| (502, "bad gateway".to_string()))
                .await
                .unwrap();
            let api = ApiClient::new(&fast_retries(), HeaderMap::new()).unwrap();

            let err = api
                .get_json::<serde_json::Value>(&server.url("/repos/apache/httpd"))
                .await
                .unwrap_err();
            assert!(matches!(err, HttpError::Status { status: 502, .. }));
            assert_eq!(server.hits(), 4);
        }

        #[tokio::test]
        async fn test_not_found_is_not_retried() {
            let server = StubServer::start(|_| (404, "{\"message\":\"Not Found\"}".to_string()))
                .await
                .unwrap();
            let api = ApiClient::new(&fast_retries(), HeaderMap::new()).unwrap();

            let err = api
                .get_json::<serde_json::Value>(&server.url("/repos/apache/missing"))
                .await
                .unwrap_err();
            match err {
                HttpError::Status { status, body, .. } => {
                    assert_eq!(status, 404);
                    assert!(body.contains("Not Found"));
                }
                other => panic!("expected status error, got {:?}", other),
            }
            assert_eq!(server.hits(), 1);

            let missing = api
                .get_json_optional::<serde_json::Value>(&server.url("/repos/apache/missing"))
                .await
                .unwrap();
            assert!(missing.is_none());
            assert_eq!(server.hits(), 2);
        }
    }
}

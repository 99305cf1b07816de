//! Commit feed client
//!
//! The feed is a long-lived HTTP response carrying one JSON object per line.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Response;

use super::events::FeedEvent;
use crate::config::AllowlistConfig;
use crate::error::{ConfigError, FeedError};
use crate::http::ApiClient;

/// A source of decoded feed events.
///
/// `Ok(None)` means the stream ended; callers reconnect by calling again.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Option<FeedEvent>, FeedError>;
}

pub struct PubSubFeed {
    api: ApiClient,
    url: String,
    response: Option<Response>,
    buffer: Vec<u8>,
}

impl PubSubFeed {
    pub fn new(api: ApiClient, url: impl Into<String>) -> Self {
        Self {
            api,
            url: url.into(),
            response: None,
            buffer: Vec::new(),
        }
    }

    pub fn from_config(config: &AllowlistConfig) -> Result<Self, ConfigError> {
        let api = ApiClient::streaming(&config.http, HeaderMap::new())?;
        Ok(Self::new(api, config.pubsub.url.clone()))
    }

    async fn connect(&mut self) -> Result<(), FeedError> {
        tracing::info!(url = %self.url, "Connecting to commit feed");
        let response = self.api.open_stream(&self.url).await?;
        self.buffer.clear();
        self.response = Some(response);
        Ok(())
    }
}

#[async_trait]
impl EventSource for PubSubFeed {
    async fn next_event(&mut self) -> Result<Option<FeedEvent>, FeedError> {
        loop {
            while let Some(line) = take_line(&mut self.buffer) {
                match FeedEvent::from_line(&line) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => tracing::warn!(error = %e, "Ignoring undecodable feed payload"),
                }
            }

            if self.response.is_none() {
                self.connect().await?;
            }
            let Some(response) = self.response.as_mut() else {
                continue;
            };
            match response.chunk().await {
                Ok(Some(chunk)) => self.buffer.extend_from_slice(&chunk),
                Ok(None) => {
                    self.response = None;
                    return Ok(None);
                }
                Err(e) => {
                    self.response = None;
                    return Err(FeedError::Stream(e.to_string()));
                }
            }
        }
    }
}

/// Remove and return the next non-blank line from `buffer`
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    loop {
        let end = buffer.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = buffer.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        if !line.is_empty() {
            return Some(line);
        }
    }
}

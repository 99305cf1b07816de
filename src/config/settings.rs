//! Allowlist manager configuration parsing
//!
//! Loads the YAML configuration file and provides strongly-typed access to
//! credentials, upstream endpoints and resolution policy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AllowlistConfig {
    /// Organization whose selected-actions policy is managed
    pub organization: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub expiration: ExpirationConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the approved-pattern document lives
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Repository (project) holding the document
    pub project: String,
    /// Path of the document within the project
    #[serde(default = "default_patterns_path")]
    pub path: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Read the document from disk instead of the raw-content URL
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

fn default_patterns_path() -> String {
    "approved_patterns.yml".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// Environment variable holding the API token
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
    #[serde(default = "default_github_api")]
    pub api_base: String,
    #[serde(default = "default_raw_base")]
    pub raw_base: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token_env: default_github_token_env(),
            api_base: default_github_api(),
            raw_base: default_raw_base(),
        }
    }
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_raw_base() -> String {
    "https://raw.githubusercontent.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Environment variable holding the registry token (optional, public
    /// images can be listed anonymously)
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_registry_api")]
    pub api_base: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            token_env: None,
            api_base: default_registry_api(),
        }
    }
}

fn default_registry_api() -> String {
    "https://hub.docker.com/v2".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    #[serde(default = "default_pubsub_url")]
    pub url: String,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            url: default_pubsub_url(),
            reconnect_secs: default_reconnect_secs(),
        }
    }
}

fn default_pubsub_url() -> String {
    "https://pubsub.apache.org:2070/git/infrastructure-actions".to_string()
}

fn default_reconnect_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpirationConfig {
    /// Expiration given to every pinned reference
    #[serde(default = "default_expiration")]
    pub default: NaiveDate,
    /// Days until preserved wildcards and tag aliases must be reconfirmed
    #[serde(default = "default_review_window_days")]
    pub review_window_days: u64,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            default: default_expiration(),
            review_window_days: default_review_window_days(),
        }
    }
}

fn default_expiration() -> NaiveDate {
    NaiveDate::from_ymd_opt(2050, 1, 1).unwrap_or(NaiveDate::MAX)
}

fn default_review_window_days() -> u64 {
    90
}

impl ExpirationConfig {
    /// Expiration date for an entry that needs human review after `today`
    pub fn review_date(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_add_days(Days::new(self.review_window_days))
            .unwrap_or(self.default)
    }
}

/// How a wildcard code-host specifier is resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WildcardPolicy {
    /// Keep `*` in the allowlist with `keep: true` and the review expiration
    #[default]
    Preserve,
    /// Pin to the head commit of the default branch
    PinHead,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub wildcard: WildcardPolicy,
    #[serde(default = "default_true")]
    pub github_owned_allowed: bool,
    #[serde(default = "default_true")]
    pub verified_allowed: bool,
    /// Check that 40-character specifiers name an existing commit
    #[serde(default)]
    pub verify_pinned_commits: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            wildcard: WildcardPolicy::default(),
            github_owned_allowed: true,
            verified_allowed: true,
            verify_pinned_commits: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Maximum entries resolved in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_concurrency() -> usize {
    8
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 0-5: 1 critical, 2 error, 3 warning, 4 info, 5 debug (0 is info)
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    /// `stdout` or a file path
    #[serde(default = "default_logfile")]
    pub logfile: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbosity: default_verbosity(),
            logfile: default_logfile(),
        }
    }
}

fn default_verbosity() -> u8 {
    3
}

fn default_logfile() -> String {
    "stdout".to_string()
}

impl AllowlistConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AllowlistConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for url in [
            &self.github.api_base,
            &self.github.raw_base,
            &self.registry.api_base,
            &self.pubsub.url,
        ] {
            Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
                url: url.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// GitHub API token from the configured environment variable
    pub fn github_token(&self) -> Result<String, ConfigError> {
        std::env::var(&self.github.token_env)
            .map_err(|_| ConfigError::MissingCredential(self.github.token_env.clone()))
    }

    /// Registry token, if one is configured
    pub fn registry_token(&self) -> Result<Option<String>, ConfigError> {
        match &self.registry.token_env {
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| ConfigError::MissingCredential(var.clone())),
            None => Ok(None),
        }
    }

    /// Raw-content URL of the approved-pattern document
    pub fn raw_document_url(&self) -> String {
        format!(
            "{}/{}/{}/refs/heads/{}/{}",
            self.github.raw_base.trim_end_matches('/'),
            self.organization,
            self.source.project,
            self.source.branch,
            self.source.path
        )
    }
}

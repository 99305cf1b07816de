//! Configuration for the allowlist manager
//!
//! Loaded once at startup from YAML and passed by reference into every
//! component constructor.

mod settings;

pub use settings::{
    AllowlistConfig, ExpirationConfig, GitHubConfig, HttpConfig, LoggingConfig, PolicyConfig,
    PubSubConfig, RegistryConfig, SourceConfig, WildcardPolicy,
};

//! Reference resolution
//!
//! This module provides:
//! - Provenance traits for the code host and the image registry
//! - GitHub and Docker Hub implementations of those traits
//! - The resolver that turns an approved entry into pinned references

pub mod dockerhub;
pub mod github;
pub mod resolver;
pub mod traits;

pub use dockerhub::DockerHubClient;
pub use github::GitHubClient;
pub use resolver::{Expirations, ReferenceResolver};
pub use traits::{CodeHost, GitObject, GitRef, ImageRegistry, ImageTag};

//! gha-allowlist
//!
//! Resolves an organization's approved CI action patterns into pinned
//! references and pushes them to the selected-actions policy.
//!
//! Pipeline for one cycle:
//! - [`source`] loads the approved-pattern document
//! - [`pattern`] parses each line into an [`pattern::ApprovedEntry`]
//! - [`resolve`] pins entries against the code host and image registry
//! - [`allowlist`] folds the results into one [`allowlist::Allowlist`]
//! - [`sync`] pushes the resulting patterns across the policy boundary
//!
//! [`watch`] reruns the cycle whenever the document changes upstream.

pub mod allowlist;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod pattern;
pub mod resolve;
pub mod source;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod watch;

pub use allowlist::{Allowlist, CycleReport, RefMetadata, ReferenceMap};
pub use config::AllowlistConfig;
pub use pattern::{parse_entry, ApprovedEntry, SourceIdentity, SourceKind, TagSpecifier};
pub use sync::{PolicySynchronizer, RunMode, SyncCycle};
pub use watch::ChangeWatcher;

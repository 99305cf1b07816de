//! Policy synchronization
//!
//! - [`boundary`]: the selected-actions endpoint
//! - [`synchronizer`]: payload construction, push and resync decisions
//! - [`cycle`]: the fetch → resolve → aggregate → push pipeline

pub mod boundary;
pub mod cycle;
pub mod synchronizer;

pub use boundary::{GitHubPolicyBoundary, PolicyBoundary, SelectedActions};
pub use cycle::{CycleOutcome, RunMode, SyncCycle};
pub use synchronizer::PolicySynchronizer;

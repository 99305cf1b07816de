//! Change watching
//!
//! - [`events`]: feed payload model and document-change filter
//! - [`pubsub`]: streaming feed client
//! - [`watcher`]: the event loop driving synchronization cycles

pub mod events;
pub mod pubsub;
pub mod watcher;

pub use events::{ChangeEvent, ChangeFilter, CommitNotice, FeedEvent};
pub use pubsub::{EventSource, PubSubFeed};
pub use watcher::{ChangeWatcher, WatchSummary};

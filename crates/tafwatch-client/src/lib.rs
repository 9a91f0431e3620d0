//! Upstream transports: snapshot fetches over HTTP, events over WebSocket,
//! and the [`Watcher`] that ties both to a replica.

pub mod http;
pub mod retry;
pub mod stream;
pub mod watcher;

pub use http::HttpSnapshotSource;
pub use retry::{Backoff, RetryConfig, RetryingSource};
pub use stream::StreamError;
pub use watcher::{ConnectionSummary, Watcher, WatcherConfig};

//! Read-only HTTP view of a replica.
//!
//! Responses reuse the snapshot fetch shapes, so a watcher can bootstrap
//! from another watcher's read API.

pub mod handlers;
pub mod server;

pub use handlers::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};

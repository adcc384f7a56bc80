//! BlameGraph HTTP API
//!
//! Triggers indexing jobs, streams their progress and serves read-only
//! traversals of the history graph.

pub mod handlers;
pub mod models;
pub mod server;

pub use handlers::{AppState, SharedState};
pub use server::{router, start};

//! HTTP API handlers for riff-sp
//!
//! REST for uploads, cancellation and cache administration; a WebSocket per
//! client for progress.

pub mod cache;
pub mod health;
pub mod process;
pub mod ws;

pub use cache::cache_routes;
pub use health::health_routes;
pub use process::process_routes;
pub use ws::progress_socket;

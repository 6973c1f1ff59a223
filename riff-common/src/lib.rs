//! # RiffRoom Common Library
//!
//! Shared code for RiffRoom services including:
//! - Error and result types
//! - Configuration loading (TOML bootstrap + environment + compiled defaults)
//! - Progress channel wire events (server → client and client → server)
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};

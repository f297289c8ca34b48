//! Research assistant host.
//!
//! Wraps the `research_search` aggregation engine in a newline-delimited JSON
//! bridge: one `SearchRequest` per stdin line, one response or failure
//! envelope per stdout line.

pub mod bridge;
pub mod config;
pub mod error;

pub use config::AppConfig;
pub use error::{AppError, Result};

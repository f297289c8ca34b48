//! Search orchestrator: concurrent fan-out, dedup, scoring, ranking.
//!
//! The [`aggregator`] dispatches a query to every selected backend under an
//! aggregate deadline; [`fusion`] merges the successful answers into one
//! deterministic ranked list.

pub mod aggregator;
pub mod dedup;
pub mod fusion;
pub mod scoring;
pub mod url_normalize;

pub use aggregator::{Aggregator, RegisteredBackend};
pub use fusion::{fuse, BackendBatch};

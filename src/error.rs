//! Error types for the research assistant host.

/// Top-level error type for the host application.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration file could not be parsed or is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// Search service construction failed.
    #[error("search error: {0}")]
    Search(#[from] research_search::SearchError),

    /// Reading requests or writing responses on the bridge failed.
    #[error("bridge error: {0}")]
    Bridge(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AppError>;

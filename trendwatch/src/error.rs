// trendwatch/src/error.rs

use thiserror::Error;

/// Failures surfaced by the engine. Each storage collaborator gets its own
/// variant so callers can tell which backend went away; none of them are
/// retried here.
#[derive(Debug, Error)]
pub enum TrendsError {
    #[error("history store: {0}")]
    History(String),
    #[error("activity index: {0}")]
    Activity(String),
    #[error("trend record store: {0}")]
    Records(String),
    #[error("entity directory: {0}")]
    Entities(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrendsError>;

//! Error taxonomy for the mapping lookup library.
//!
//! Per-artist and per-index failures are absorbed by the search path and
//! show up as empty result sets. Only malformed requests, configuration
//! problems and store/worker faults reach the caller as errors.

use thiserror::Error;

/// Result type for mapping lookup operations.
pub type Result<T> = std::result::Result<T, MappingError>;

#[derive(Error, Debug)]
pub enum MappingError {
    /// The nearest-neighbor backend is disabled; every index returns no matches.
    #[error("nearest-neighbor backend unavailable: fuzzy indexes will return no matches")]
    BackendUnavailable,

    /// No rows for this artist on this shard.
    #[error("artist {0} not found on this shard")]
    ArtistNotFound(i64),

    /// Request is missing a required field or a field cannot be normalized.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Row-store (SQLite) error.
    #[error("row store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// The shard planner needs at least one shard.
    #[error("shard count must be at least 1")]
    InvalidShardCount,

    /// The worker owning this shard has stopped and no longer accepts requests.
    #[error("shard worker {0} is no longer accepting requests")]
    WorkerDisconnected(usize),
}

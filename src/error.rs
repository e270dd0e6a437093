//! Error types for the learned-behaviour engine

use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The candidate universe is empty, so no tree can be grown
    #[error("no candidate split available (reference data missing or exhausted)")]
    NoCandidateSplit,

    /// A node, tree or record id that does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Persisted tree structure that cannot be evaluated
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    /// A stored column value that does not parse back into its type
    #[error("malformed column value: {0}")]
    MalformedColumn(String),

    /// A forest run is already in flight
    #[error("a tree-growth run is already in progress")]
    ConcurrentRunConflict,

    /// A correction log entry that cannot be applied to a snapshot
    #[error("malformed correction log: {0}")]
    MalformedLog(String),

    /// Configuration loading or validation error
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error types for the sync engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote source error: {0}")]
    Remote(String),

    #[error("Local store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sync already in progress")]
    AlreadySyncing,
}

pub type Result<T> = std::result::Result<T, SyncError>;

use thiserror::Error;

use crate::crypto::CipherError;

/// Errors produced by the local store and the repositories built on it.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error, including disk-level I/O failures surfaced by the engine.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to determine a platform data directory.
    #[error("could not determine application data directory")]
    NoDataDir,

    /// A query expected exactly one row but found none.
    #[error("record not found")]
    NotFound,

    /// A migration step failed. The store must not be used afterwards.
    #[error("migration error: {0}")]
    Migration(String),

    /// The database file was written by a newer schema than this build
    /// supports. Opening fails outright; nothing is dropped or rewritten.
    #[error("database file uses schema version {found}, newer than supported version {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },

    /// The blocking worker running a database operation panicked or was
    /// cancelled before completing.
    #[error("database worker failed: {0}")]
    Runtime(#[from] tokio::task::JoinError),

    /// Chat message encryption or decryption failed.
    #[error("message cipher error: {0}")]
    Cipher(#[from] CipherError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

use thiserror::Error;

use mastermind_shared::CodecError;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// An amount or address that cannot be stored.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The payment signature was already spent on another create or join.
    #[error("Payment signature {0} has already been used")]
    SignatureReused(String),

    /// Another address holds this username (case-insensitive).
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),

    /// Usernames are set once.
    #[error("This address already has the username '{0}'")]
    UsernameAlreadySet(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

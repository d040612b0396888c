use thiserror::Error;

/// Errors produced by the store layer.
///
/// Business-logic conditions (duplicates, stale or malformed records) are
/// never errors here; they are filtered by the channel layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Path was empty or contained a control character.
    #[error("Invalid store path: {0:?}")]
    InvalidPath(String),

    /// The replica mutex was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// The transport behind the store has shut down.
    #[error("Store transport closed")]
    Closed,

    /// The transport could not accept the write right now.
    #[error("Store transport busy, write dropped")]
    Backpressure,

    /// Encoded operation exceeds the wire limit.
    #[error("Operation too large: {0} bytes")]
    TooLarge(usize),

    /// Value could not be encoded for the wire.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

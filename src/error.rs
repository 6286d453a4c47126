// for error definitions
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdmissionError {
    /// Malformed policy or settings detected at startup. Fatal.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to the counter store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Counter store errors. All of them are recoverable through the failure mode.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    Connection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    Auth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    Command(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// The store did not answer within the configured bound
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The circuit breaker is open and the store was not contacted
    #[error("Store circuit is open")]
    CircuitOpen,

    /// In-memory store is full
    #[error("Maximum entries limit exceeded ({0})")]
    Capacity(usize),

    /// In-memory store lock was poisoned by a panicking holder
    #[error("Store lock poisoned")]
    Poisoned,
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => StoreError::Auth(err.to_string()),
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                StoreError::Connection(err.to_string())
            }
            _ => StoreError::Command(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for AdmissionError {
    fn from(err: redis::RedisError) -> Self {
        AdmissionError::Store(err.into())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, AdmissionError>;

//! Error types shared by the store, transport, sync and edit-save paths.

use thiserror::Error;

/// Result alias for local store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Retry policy class for server responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Classify an HTTP status into retry behavior.
///
/// Only used for diagnostics: queued actions are retried on every pass
/// regardless of class.
pub fn classify_http_status(status: u16) -> RetryClass {
    match status {
        401 | 403 => RetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
        500..=599 => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store failed to initialize; all writes are refused.
    #[error("Local store is unavailable")]
    Unavailable,

    #[error("LMDB error: {0}")]
    Lmdb(#[from] lmdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bookkeeping could not be decoded; the write was refused.
    #[error("Corrupt store data: {0}")]
    Corrupt(String),

    /// A blocking store task panicked or was cancelled.
    #[error("Store task failed: {0}")]
    Blocking(String),
}

/// Errors raised while talking to the server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete within its time bound.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The server could not be reached at all.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(0)
        } else if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

/// Failure of one item during a sync pass.
#[derive(Debug, Error)]
pub enum SyncItemError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The queued action type has no known endpoint.
    #[error("Unknown action type: {0}")]
    UnknownAction(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncItemError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify error for retry diagnostics.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Transport(_) => RetryClass::Retryable,
            Self::UnknownAction(_) => RetryClass::Permanent,
            Self::Store(_) => RetryClass::Retryable,
        }
    }
}

/// Errors raised by section reads and saves that are not conflicts.
#[derive(Debug, Error)]
pub enum SaveError {
    /// Nothing to save: the session has no local change.
    #[error("Edit session has no pending change")]
    NotDirty,

    /// The session hit a version conflict and must be reloaded first.
    #[error("Edit session is in conflict; reload required before saving")]
    ConflictPending,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed server response: {0}")]
    Malformed(String),
}

impl SaveError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// True for failures that leave the edit recoverable by simply retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => classify_http_status(*status) == RetryClass::Retryable,
            _ => false,
        }
    }
}

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

use crate::error::{SaveError, StoreError, SyncItemError, TransportError};

/// Envelope returned across the FFI boundary and by config loading.
#[derive(Debug, Serialize, Deserialize)]
pub enum AppResponse {
    DatabaseError(String),
    SerializationError(String),
    NotFound(String),
    ValidationError(String),
    BadRequest(String),
    NetworkError(String),
    Conflict(String),
    Ok(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::NetworkError(msg) => write!(f, "Network error: {}", msg),
            AppResponse::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppResponse::Ok(msg) => write!(f, "Ok: {}", msg),
        }
    }
}

impl From<StoreError> for AppResponse {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable => {
                AppResponse::DatabaseError("Local store is unavailable".to_string())
            }
            StoreError::Lmdb(lmdb::Error::NotFound) => {
                AppResponse::NotFound("Record not found".to_string())
            }
            StoreError::Lmdb(lmdb::Error::MapFull) => {
                AppResponse::DatabaseError("Database map is full".to_string())
            }
            StoreError::Lmdb(e) => AppResponse::DatabaseError(format!("LMDB error: {e}")),
            StoreError::Serialization(e) => AppResponse::from(e),
            StoreError::Io(e) => AppResponse::DatabaseError(format!("IO error: {e}")),
            StoreError::Corrupt(msg) => AppResponse::DatabaseError(format!("Corrupt data: {msg}")),
            StoreError::Blocking(msg) => AppResponse::DatabaseError(msg),
        }
    }
}

impl From<SerdeError> for AppResponse {
    fn from(err: SerdeError) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<TransportError> for AppResponse {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidRequest(msg) => AppResponse::BadRequest(msg),
            other => AppResponse::NetworkError(other.to_string()),
        }
    }
}

impl From<SyncItemError> for AppResponse {
    fn from(err: SyncItemError) -> Self {
        match err {
            SyncItemError::Store(e) => AppResponse::from(e),
            SyncItemError::Transport(e) => AppResponse::from(e),
            SyncItemError::UnknownAction(kind) => {
                AppResponse::ValidationError(format!("Unknown action type: {kind}"))
            }
            api @ SyncItemError::Api { .. } => AppResponse::NetworkError(api.to_string()),
        }
    }
}

impl From<SaveError> for AppResponse {
    fn from(err: SaveError) -> Self {
        match err {
            SaveError::ConflictPending => AppResponse::Conflict(err.to_string()),
            SaveError::NotDirty => AppResponse::BadRequest(err.to_string()),
            SaveError::Transport(e) => AppResponse::from(e),
            SaveError::Malformed(msg) => AppResponse::SerializationError(msg),
            api @ SaveError::Api { .. } => AppResponse::NetworkError(api.to_string()),
        }
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AppResponse::Ok(_))
    }
}

//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("processor request failed: {0}")]
    Processor(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("conflicting write: expected status {expected}, job {id} was not in that state")]
    Conflict { id: String, expected: String },

    #[error("duplicate job id: {0}")]
    DuplicateId(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("queue is at capacity")]
    CapacityExceeded,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn conflict(id: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.into(),
            expected: expected.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True if the underlying SQLite error is a transient busy/locked condition
    /// worth retrying rather than surfacing immediately.
    pub fn is_transient_storage_error(&self) -> bool {
        let Error::DatabaseSqlx(sqlx_err) = self else {
            return false;
        };
        match sqlx_err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                if matches!(code.as_deref(), Some("5") | Some("6")) {
                    return true;
                }
                let msg = db_err.message().to_ascii_lowercase();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
            other => {
                let msg = other.to_string().to_ascii_lowercase();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
        }
    }
}

//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)          Ledger rule (CoreError)           │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  DbError (this module) ◄──────────────────┘                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  EngineError (kura-engine) ← Busy / PoolExhausted → ConcurrencyAborted │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Caller displays the reason string                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use kura_core::CoreError;
use thiserror::Error;

/// SQLite result codes that mean "another writer holds the lock".
///
/// BUSY (5), LOCKED (6), BUSY_RECOVERY (261), LOCKED_SHAREDCACHE (262),
/// BUSY_SNAPSHOT (517), BUSY_TIMEOUT (773).
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517", "773"];

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A conditional update matched no row because the row moved on.
    ///
    /// ## When This Occurs
    /// - Status compare-and-set (`WHERE status = ?`) lost a race
    /// - A reception was already deposited by another cart
    #[error("Conflict on {entity} {id}: {reason}")]
    Conflict {
        entity: String,
        id: String,
        reason: String,
    },

    /// A stock movement was already reversed, or cannot be reversed.
    #[error("Stock movement {movement_id} cannot be reversed: {reason}")]
    InvalidReversal { movement_id: i64, reason: String },

    /// The write lock could not be taken within the configured wait.
    #[error("Database is busy: {0}")]
    Busy(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use past the acquire timeout).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A ledger rule failed inside a repository.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Conflict error.
    pub fn conflict(
        entity: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DbError::Conflict {
            entity: entity.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// True when retrying the whole unit of work may succeed.
    pub fn is_lock_failure(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → busy code? Busy : constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let is_busy = db_err
                    .code()
                    .is_some_and(|code| BUSY_CODES.contains(&code.as_ref()))
                    || msg.contains("database is locked");

                if is_busy {
                    DbError::Busy(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_lock_failure() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::PoolExhausted));
        assert!(err.is_lock_failure());
    }

    #[test]
    fn test_core_error_passes_through() {
        let err: DbError = CoreError::InsufficientStock {
            product_id: "p-1".to_string(),
            available: 1,
            requested: 2,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product p-1: available 1, requested 2"
        );
        assert!(!err.is_lock_failure());
    }
}

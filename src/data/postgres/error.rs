//! Sink (PostgreSQL) error types
//!
//! `From<sqlx::Error>` folds driver errors into the taxonomy at the edge:
//! deadlocks, serialization failures and pool exhaustion are transient,
//! constraint violations are row-local data errors, everything else is
//! persistent and aborts the run.

use thiserror::Error;

use crate::data::error::{Classify, ErrorKind};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink connection error: {0}")]
    Connect(String),

    #[error("Sink constraint violation{}: {message}", code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    Constraint {
        code: Option<String>,
        message: String,
    },

    #[error("Sink operation timed out: {0}")]
    Timeout(String),

    #[error("Transient sink error: {0}")]
    Transient(String),

    #[error("Lease conflict: {0}")]
    LeaseConflict(String),

    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    #[error("Sink configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl Classify for SinkError {
    fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Connect(_) | SinkError::Timeout(_) | SinkError::Transient(_) => {
                ErrorKind::Transient
            }
            SinkError::Constraint { .. } => ErrorKind::Data,
            SinkError::LeaseConflict(_)
            | SinkError::MigrationFailed { .. }
            | SinkError::Config(_)
            | SinkError::Database(_) => ErrorKind::Persistent,
        }
    }
}

impl From<sqlx::Error> for SinkError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut => SinkError::Timeout("connection pool exhausted".into()),
            sqlx::Error::PoolClosed => SinkError::Connect("connection pool closed".into()),
            sqlx::Error::Io(io) => SinkError::Connect(io.to_string()),
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.to_string());
                match code.as_deref() {
                    // integrity_constraint_violation family
                    Some(c) if c.starts_with("23") => SinkError::Constraint {
                        code,
                        message: db.message().to_string(),
                    },
                    // serialization_failure, deadlock_detected
                    Some("40001") | Some("40P01") => SinkError::Transient(db.message().to_string()),
                    // too_many_connections, cannot_connect_now
                    Some("53300") | Some("57P03") => SinkError::Transient(db.message().to_string()),
                    // query_canceled (statement timeout)
                    Some("57014") => SinkError::Timeout(db.message().to_string()),
                    // admin_shutdown, crash_shutdown: connection is gone
                    Some("57P01") | Some("57P02") => SinkError::Connect(db.message().to_string()),
                    _ => SinkError::Database(db.message().to_string()),
                }
            }
            _ => SinkError::Database(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_taxonomy() {
        assert_eq!(
            SinkError::Transient("deadlock".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            SinkError::Timeout("pool".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            SinkError::Connect("reset".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            SinkError::Constraint {
                code: Some("23502".into()),
                message: "null value".into()
            }
            .kind(),
            ErrorKind::Data
        );
        assert_eq!(
            SinkError::LeaseConflict("held".into()).kind(),
            ErrorKind::Persistent
        );
        assert_eq!(
            SinkError::Database("schema mismatch".into()).kind(),
            ErrorKind::Persistent
        );
    }

    #[test]
    fn pool_timeout_maps_to_timeout() {
        let err: SinkError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, SinkError::Timeout(_)));
    }
}

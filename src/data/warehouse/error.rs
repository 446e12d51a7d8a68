//! Warehouse error types

use thiserror::Error;

use crate::data::error::{Classify, ErrorKind};

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("Warehouse connection error: {0}")]
    Connect(String),

    #[error("Warehouse authentication failed: {0}")]
    Auth(String),

    #[error("Warehouse query failed{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Query { status: Option<u16>, message: String },

    #[error("Warehouse read timed out: {0}")]
    ReadTimeout(String),

    #[error("Failed to decode warehouse row: {0}")]
    Decode(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl Classify for WarehouseError {
    fn kind(&self) -> ErrorKind {
        match self {
            WarehouseError::Connect(_) | WarehouseError::ReadTimeout(_) => ErrorKind::Transient,
            WarehouseError::Query { status, .. } => match status {
                Some(429) => ErrorKind::Transient,
                Some(s) if *s >= 500 => ErrorKind::Transient,
                _ => ErrorKind::Persistent,
            },
            WarehouseError::Auth(_) | WarehouseError::InvalidIdentifier(_) => ErrorKind::Persistent,
            WarehouseError::Decode(_) => ErrorKind::Data,
        }
    }
}

impl From<reqwest::Error> for WarehouseError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            WarehouseError::ReadTimeout(e.to_string())
        } else if e.is_connect() {
            WarehouseError::Connect(e.to_string())
        } else {
            WarehouseError::Query {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_taxonomy() {
        assert_eq!(
            WarehouseError::Connect("reset".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            WarehouseError::ReadTimeout("t".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            WarehouseError::Query {
                status: Some(503),
                message: "busy".into()
            }
            .kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            WarehouseError::Query {
                status: Some(429),
                message: "slow down".into()
            }
            .kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            WarehouseError::Query {
                status: Some(400),
                message: "bad sql".into()
            }
            .kind(),
            ErrorKind::Persistent
        );
        assert_eq!(
            WarehouseError::Auth("denied".into()).kind(),
            ErrorKind::Persistent
        );
        assert_eq!(
            WarehouseError::Decode("missing id".into()).kind(),
            ErrorKind::Data
        );
    }
}

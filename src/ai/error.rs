//! AI endpoint error types

use thiserror::Error;

use crate::data::error::{Classify, ErrorKind};

#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI rate limit exhausted")]
    RateLimited,

    #[error("AI request timed out: {0}")]
    Timeout(String),

    #[error("Transient AI error: {0}")]
    Transient(String),

    #[error("Persistent AI error: {0}")]
    Persistent(String),

    #[error("AI cost budget exceeded")]
    BudgetExceeded,

    #[error("AI circuit breaker is open")]
    CircuitOpen,

    #[error("AI response failed validation: {0}")]
    InvalidResponse(String),
}

impl Classify for AiError {
    fn kind(&self) -> ErrorKind {
        match self {
            AiError::RateLimited | AiError::Timeout(_) | AiError::Transient(_) => {
                ErrorKind::Transient
            }
            AiError::Persistent(_) => ErrorKind::Persistent,
            AiError::BudgetExceeded => ErrorKind::Budget,
            AiError::CircuitOpen => ErrorKind::CircuitOpen,
            AiError::InvalidResponse(_) => ErrorKind::Data,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AiError::Timeout(e.to_string())
        } else if e.is_connect() {
            AiError::Transient(e.to_string())
        } else {
            match e.status().map(|s| s.as_u16()) {
                Some(429) => AiError::RateLimited,
                Some(s) if s >= 500 => AiError::Transient(e.to_string()),
                Some(401) | Some(403) => AiError::Persistent(format!("authentication: {}", e)),
                _ => AiError::Persistent(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_taxonomy() {
        assert_eq!(AiError::RateLimited.kind(), ErrorKind::Transient);
        assert_eq!(AiError::Timeout("t".into()).kind(), ErrorKind::Transient);
        assert_eq!(AiError::Transient("503".into()).kind(), ErrorKind::Transient);
        assert_eq!(AiError::Persistent("401".into()).kind(), ErrorKind::Persistent);
        assert_eq!(AiError::BudgetExceeded.kind(), ErrorKind::Budget);
        assert_eq!(AiError::CircuitOpen.kind(), ErrorKind::CircuitOpen);
        assert_eq!(
            AiError::InvalidResponse("bad json".into()).kind(),
            ErrorKind::Data
        );
    }
}

//! Error types for the dashboard

use thiserror::Error;

/// Dashboard-wide error type
#[derive(Error, Debug)]
pub enum DeckError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeckError {
    pub fn api(msg: impl Into<String>) -> Self {
        DeckError::Api(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        DeckError::Network(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        DeckError::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        DeckError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        DeckError::Internal(msg.into())
    }
}

/// Result type alias for dashboard operations
pub type DeckResult<T> = Result<T, DeckError>;

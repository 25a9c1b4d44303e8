use thiserror::Error;

pub type OutreachResult<T> = Result<T, OutreachError>;

#[derive(Error, Debug)]
pub enum OutreachError {
    /// Malformed campaign spec. Surfaced to the caller; nothing persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not permitted in the current lifecycle state. Surfaced;
    /// no side effects.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unresolvable tracking id or entity. Tracking endpoints log this and
    /// degrade gracefully instead of surfacing it.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Click target URL failed to decode; no state is mutated.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

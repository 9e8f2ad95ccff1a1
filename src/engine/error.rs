use ulid::Ulid;

use crate::model::Date;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    /// The exclusion check found an overlapping restriction on the room.
    #[error("room already restricted by {0} for these dates")]
    Conflict(Ulid),
    #[error("invalid dates: check-in {start} must be before check-out {end}")]
    InvalidDates { start: Date, end: Date },
    #[error("invalid month: {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),
    /// Deliberately says nothing about which half of the credentials failed.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Validation(String),
    #[error("store operation timed out: {0}")]
    Timeout(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

impl EngineError {
    /// Transient failures the caller may surface as "try again".
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Timeout(_) | EngineError::WalError(_))
    }
}

use ulid::Ulid;

use crate::model::{ApprovalAction, BookingStatus, ConflictSummary};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Bad input shape — rejected before any WAL write.
    Validation(String),
    /// The hall cannot take the requested window. Distinct from generic
    /// failure so callers can re-prompt for a different slot.
    Unavailable {
        reason: String,
        conflict: Option<ConflictSummary>,
    },
    /// Wrong role or wrong department for the attempted action.
    Unauthorized(String),
    /// The booking is in a state the action does not apply to.
    InvalidTransition {
        from: BookingStatus,
        action: ApprovalAction,
    },
    EmptyReason,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Unavailable { reason, .. } => {
                write!(f, "hall not available: {reason}")
            }
            EngineError::Unauthorized(msg) => write!(f, "not authorized: {msg}"),
            EngineError::InvalidTransition { from, action } => {
                write!(
                    f,
                    "booking in state {from} cannot be {}",
                    action.as_str()
                )
            }
            EngineError::EmptyReason => write!(f, "rejection requires a non-empty reason"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

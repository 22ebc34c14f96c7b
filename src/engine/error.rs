use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::ClockError;
use crate::model::SlotStatus;

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    DayOff(NaiveDate),
    Conflict {
        status: SlotStatus,
        booking: Option<Ulid>,
    },
    LimitExceeded(&'static str),
    Storage(String),
}

impl EngineError {
    /// PostgreSQL SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "22023",
            EngineError::NotFound(_) => "P0002",
            EngineError::AlreadyExists(_) => "23505",
            EngineError::DayOff(_) | EngineError::Conflict { .. } => "23P01",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::Storage(_) => "58030",
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::DayOff(_) => "day_off",
            EngineError::Conflict { status, .. } => status.as_str(),
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Storage(_) => "storage",
        }
    }

    /// Storage failures leave no partial state; the same request may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DayOff(date) => write!(f, "{date} is not a working day"),
            EngineError::Conflict {
                status,
                booking: Some(id),
            } => write!(f, "slot unavailable ({status}): overlaps booking {id}"),
            EngineError::Conflict { status, booking: None } => {
                write!(f, "slot unavailable ({status})")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ClockError> for EngineError {
    fn from(e: ClockError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

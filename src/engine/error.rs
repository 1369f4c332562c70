use std::fmt;

use thiserror::Error;

use crate::model::{Day, ReservationId};

use super::store::StoreError;

/// Why a request was turned away as a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The requested days overlap an existing reservation.
    Reserved,
    /// The reservation already started on the given day and is immutable.
    Started(Day),
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::Reserved => write!(f, "the room is already reserved for that period"),
            ConflictReason::Started(day) => {
                write!(f, "the reservation cannot be cancelled or modified: started {day}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),
    #[error("{0}")]
    Conflict(ConflictReason),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error(transparent)]
    Store(Box<dyn std::error::Error + Send + Sync>),
    #[error("days must be between {min} and {max}, got {0}", min = crate::limits::MIN_DAYS, max = crate::limits::MAX_DAYS)]
    InvalidDays(u32),
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Other(inner) => BookingError::Store(inner),
            other => BookingError::Persistence(other.to_string()),
        }
    }
}

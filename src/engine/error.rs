use thiserror::Error;

use crate::model::{DateRange, Item, ItemId, RangeError};
use crate::store::StoreError;

/// Why a booking request was turned down. The item is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("invalid booking dates: {0}")]
    InvalidRange(#[from] RangeError),
    #[error("dates overlap existing reservation {existing}")]
    Overlap { existing: DateRange },
}

impl Rejection {
    /// Short machine-readable tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::InvalidRange(_) => "invalid_range",
            Rejection::Overlap { .. } => "overlap",
        }
    }

    /// Message shown next to the booking form.
    pub fn user_message(&self) -> &'static str {
        match self {
            Rejection::InvalidRange(_) => "Invalid booking dates.",
            Rejection::Overlap { .. } => "These dates are already booked.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("item not found: {0}")]
    NotFound(ItemId),
    /// Persistence failed or timed out. Nothing was written and the request
    /// may be retried as is, except after [`StoreError::Unconfirmed`]: that
    /// write may still land, so reload the item before retrying.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    /// Reservation appended and persisted; carries the saved item.
    Booked(Item),
    /// Carries the item as it was loaded, for re-rendering next to the error.
    Rejected { reason: Rejection, item: Item },
}

impl BookingOutcome {
    pub fn item(&self) -> &Item {
        match self {
            BookingOutcome::Booked(item) | BookingOutcome::Rejected { item, .. } => item,
        }
    }

    pub fn is_booked(&self) -> bool {
        matches!(self, BookingOutcome::Booked(_))
    }
}

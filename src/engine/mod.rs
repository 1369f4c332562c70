//! Booking orchestration: availability checks and the place / cancel /
//! modify use cases, composed over a [`ReservationStore`] and a [`Clock`].

mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod wal_store;

pub use conflict::{conflict, find_conflict, overlaps};
pub use error::{BookingError, ConflictReason};
pub use store::{InMemoryStore, ReservationStore, StoreError};
pub use wal_store::WalStore;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::model::*;

/// The booking orchestrator. Holds no reservation state of its own: every
/// call reads the current set from the store.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    /// Serializes place / modify / cancel so check-then-write is atomic.
    /// There is one room, so one lock covers every write path.
    write_lock: Mutex<()>,
}

impl Engine {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn today(&self) -> Day {
        self.clock.today()
    }

    /// Look up a reservation that is still allowed to change.
    async fn resolve_mutable(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        let reservation = self.store.get(id).await?.ok_or(BookingError::NotFound(id))?;
        if reservation.is_locked(self.today()) {
            return Err(BookingError::Conflict(ConflictReason::Started(reservation.start)));
        }
        Ok(reservation)
    }
}

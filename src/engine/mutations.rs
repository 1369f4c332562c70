use tracing::info;

use crate::model::*;
use crate::observability::{
    CONFLICTS_TOTAL, RESERVATIONS_CANCELLED_TOTAL, RESERVATIONS_MODIFIED_TOTAL,
    RESERVATIONS_PLACED_TOTAL,
};

use super::{BookingError, ConflictReason, Engine};

impl Engine {
    pub async fn place_reservation(&self, candidate: Candidate) -> Result<Reservation, BookingError> {
        let _write = self.write_lock.lock().await;
        self.ensure_available(&candidate, None).await?;

        let reservation = self
            .store
            .insert(NewReservation::from_candidate(&candidate))
            .await?;
        info!(
            "placed reservation {} ({}..{})",
            reservation.id, reservation.start, reservation.finish
        );
        metrics::counter!(RESERVATIONS_PLACED_TOTAL).increment(1);
        Ok(reservation)
    }

    /// Remove a pending reservation and return what was removed.
    pub async fn cancel_reservation(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        let _write = self.write_lock.lock().await;
        let reservation = self.resolve_mutable(id).await.inspect_err(count_started)?;

        self.store.delete(&reservation).await?;
        info!("cancelled reservation {id}");
        metrics::counter!(RESERVATIONS_CANCELLED_TOTAL).increment(1);
        Ok(reservation)
    }

    /// Move a pending reservation to new dates, keeping its id.
    ///
    /// Immutability is judged on the stored start date, not the requested one.
    /// The new dates are checked against every other reservation; on conflict
    /// nothing is written.
    pub async fn modify_reservation(
        &self,
        id: ReservationId,
        candidate: Candidate,
    ) -> Result<Reservation, BookingError> {
        let _write = self.write_lock.lock().await;
        let mut reservation = self.resolve_mutable(id).await.inspect_err(count_started)?;

        self.ensure_available(&candidate, Some(id)).await?;
        reservation.reschedule(&candidate);

        self.store.update(&reservation).await?;
        info!(
            "modified reservation {id} ({}..{})",
            reservation.start, reservation.finish
        );
        metrics::counter!(RESERVATIONS_MODIFIED_TOTAL).increment(1);
        Ok(reservation)
    }
}

fn count_started(e: &BookingError) {
    if let BookingError::Conflict(ConflictReason::Started(_)) = e {
        metrics::counter!(CONFLICTS_TOTAL, "reason" => "started").increment(1);
    }
}

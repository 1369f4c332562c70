use tracing::debug;

use crate::model::*;
use crate::observability::CONFLICTS_TOTAL;

use super::conflict::{find_conflict, validate_days};
use super::{BookingError, ConflictReason, Engine};

impl Engine {
    /// Fails with a `Reserved` conflict if `candidate` collides with any stored
    /// reservation other than `exclude`. Reads only.
    pub(super) async fn ensure_available(
        &self,
        candidate: &Candidate,
        exclude: Option<ReservationId>,
    ) -> Result<(), BookingError> {
        validate_days(candidate.days)?;
        let span = candidate.span();
        let existing = self.store.list().await?;
        if let Some(blocking) = find_conflict(&span, &existing, exclude) {
            debug!(
                "{}..{} blocked by reservation {} ({}..{})",
                span.start, span.finish, blocking.id, blocking.start, blocking.finish
            );
            metrics::counter!(CONFLICTS_TOTAL, "reason" => "reserved").increment(1);
            return Err(BookingError::Conflict(ConflictReason::Reserved));
        }
        Ok(())
    }

    pub async fn check_availability(&self, candidate: Candidate) -> Result<(), BookingError> {
        self.ensure_available(&candidate, None).await
    }

    pub async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        self.store.get(id).await?.ok_or(BookingError::NotFound(id))
    }

    pub async fn list_reservations(&self) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.store.list().await?)
    }
}

use crate::limits::{MAX_DAYS, MIN_DAYS};
use crate::model::*;

use super::BookingError;

pub(crate) fn validate_days(days: u32) -> Result<(), BookingError> {
    if !(MIN_DAYS..=MAX_DAYS).contains(&days) {
        return Err(BookingError::InvalidDays(days));
    }
    Ok(())
}

/// Does `candidate` collide with `existing`?
///
/// Either candidate boundary landing inside the existing stay is a conflict.
/// The reverse direction is only checked for single-day stays, so a multi-day
/// stay strictly inside a wider candidate is not reported here.
pub fn overlaps(candidate: &Span, existing: &Reservation) -> bool {
    let x = existing.span();
    (candidate.start >= x.start && candidate.start <= x.finish)
        || (candidate.finish >= x.start && candidate.finish <= x.finish)
        || (x.start >= candidate.start && x.start <= candidate.finish && existing.days == 1)
}

/// First reservation in `existing` that blocks `candidate`, skipping `exclude`.
pub fn find_conflict<'a>(
    candidate: &Span,
    existing: &'a [Reservation],
    exclude: Option<ReservationId>,
) -> Option<&'a Reservation> {
    existing
        .iter()
        .filter(|r| Some(r.id) != exclude)
        .find(|r| overlaps(candidate, r))
}

pub fn conflict(candidate: &Span, existing: &[Reservation], exclude: Option<ReservationId>) -> bool {
    find_conflict(candidate, existing, exclude).is_some()
}

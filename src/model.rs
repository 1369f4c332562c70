use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Canonical calendar day (UTC, no time component). The only time type.
pub type Day = NaiveDate;

pub type ReservationId = Ulid;

/// Last day occupied by a stay of `days` days starting on `start`.
///
/// `days` of zero is treated as one; callers validate the range first.
pub fn finish_of(start: Day, days: u32) -> Day {
    let extra = u64::from(days.saturating_sub(1));
    start.checked_add_days(Days::new(extra)).unwrap_or(NaiveDate::MAX)
}

/// Closed interval `[start, finish]` of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Day,
    pub finish: Day,
}

impl Span {
    pub fn new(start: Day, finish: Day) -> Self {
        debug_assert!(start <= finish, "Span start must not be after finish");
        Self { start, finish }
    }
}

/// A requested `(date, days)` pair that has not been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub date: Day,
    pub days: u32,
}

impl Candidate {
    pub fn new(date: Day, days: u32) -> Self {
        Self { date, days }
    }

    pub fn finish(&self) -> Day {
        finish_of(self.date, self.days)
    }

    pub fn span(&self) -> Span {
        Span::new(self.date, self.finish())
    }
}

/// Lifecycle of a reservation relative to "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Starts in the future; may be cancelled or modified.
    Pending,
    /// `start <= today <= finish`.
    Active,
    /// `today > finish`.
    Past,
}

/// A booked interval on the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub start: Day,
    pub finish: Day,
    pub days: u32,
}

impl Reservation {
    pub fn new(id: ReservationId, candidate: &Candidate) -> Self {
        Self {
            id,
            start: candidate.date,
            finish: candidate.finish(),
            days: candidate.days,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.finish)
    }

    /// Move the reservation to `candidate`'s dates. `finish` is always re-derived.
    pub fn reschedule(&mut self, candidate: &Candidate) {
        self.start = candidate.date;
        self.days = candidate.days;
        self.finish = candidate.finish();
    }

    pub fn phase(&self, today: Day) -> Phase {
        if today < self.start {
            Phase::Pending
        } else if today <= self.finish {
            Phase::Active
        } else {
            Phase::Past
        }
    }

    /// Started or finished reservations can no longer be cancelled or modified.
    pub fn is_locked(&self, today: Day) -> bool {
        self.phase(today) != Phase::Pending
    }
}

/// Reservation fields before the store assigns an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewReservation {
    pub start: Day,
    pub finish: Day,
    pub days: u32,
}

impl NewReservation {
    pub fn from_candidate(candidate: &Candidate) -> Self {
        Self {
            start: candidate.date,
            finish: candidate.finish(),
            days: candidate.days,
        }
    }

    pub fn with_id(self, id: ReservationId) -> Reservation {
        Reservation {
            id,
            start: self.start,
            finish: self.finish,
            days: self.days,
        }
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationPlaced {
        id: ReservationId,
        start: Day,
        finish: Day,
        days: u32,
    },
    ReservationModified {
        id: ReservationId,
        start: Day,
        finish: Day,
        days: u32,
    },
    ReservationCancelled {
        id: ReservationId,
    },
}

impl Event {
    pub fn placed(r: &Reservation) -> Self {
        Event::ReservationPlaced {
            id: r.id,
            start: r.start,
            finish: r.finish,
            days: r.days,
        }
    }

    pub fn modified(r: &Reservation) -> Self {
        Event::ReservationModified {
            id: r.id,
            start: r.start,
            finish: r.finish,
            days: r.days,
        }
    }

    pub fn reservation_id(&self) -> ReservationId {
        match self {
            Event::ReservationPlaced { id, .. }
            | Event::ReservationModified { id, .. }
            | Event::ReservationCancelled { id } => *id,
        }
    }
}

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write failed: {0}")]
    Write(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("no stored reservation {0}")]
    Missing(ReservationId),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// What the booking engine needs from persistence, and nothing more.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Every stored reservation, ordered by start day.
    async fn list(&self) -> Result<Vec<Reservation>, StoreError>;

    /// Persist a new reservation and return it with its assigned id.
    async fn insert(&self, new: NewReservation) -> Result<Reservation, StoreError>;

    async fn update(&self, reservation: &Reservation) -> Result<(), StoreError>;

    async fn delete(&self, reservation: &Reservation) -> Result<(), StoreError>;
}

pub struct InMemoryStore {
    reservations: DashMap<ReservationId, Reservation>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Reservation> {
        let mut all: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| (r.start, r.id));
        all
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::ReservationPlaced { id, start, finish, days }
            | Event::ReservationModified { id, start, finish, days } => {
                self.reservations.insert(
                    *id,
                    Reservation {
                        id: *id,
                        start: *start,
                        finish: *finish,
                        days: *days,
                    },
                );
            }
            Event::ReservationCancelled { id } => {
                self.reservations.remove(id);
            }
        }
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.get(&id).map(|e| e.value().clone()))
    }

    async fn list(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.snapshot())
    }

    async fn insert(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        let reservation = new.with_id(Ulid::new());
        self.apply_event(&Event::placed(&reservation));
        Ok(reservation)
    }

    async fn update(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if !self.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Missing(reservation.id));
        }
        self.apply_event(&Event::modified(reservation));
        Ok(())
    }

    async fn delete(&self, reservation: &Reservation) -> Result<(), StoreError> {
        self.reservations
            .remove(&reservation.id)
            .map(|_| ())
            .ok_or(StoreError::Missing(reservation.id))
    }
}

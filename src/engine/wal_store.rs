use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

use super::store::{InMemoryStore, ReservationStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then pays for a single fsync and answers every sender with its result.
///
/// The writer is also the only task that applies events to the read model,
/// so a compaction snapshot always covers every append logged before it.
async fn wal_writer_loop(mut wal: Wal, memory: Arc<InMemoryStore>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, &memory, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &memory, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, &memory, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, memory: &InMemoryStore, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());
    for (event, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => {
                memory.apply_event(&event);
                Ok(())
            }
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so buffered bytes don't leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, memory: &InMemoryStore, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let events: Vec<Event> = memory.snapshot().iter().map(Event::placed).collect();
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            commit_batch(wal, memory, &mut vec![(event, response)]);
        }
    }
}

/// Durable store: every mutation hits the WAL before the in-memory read model.
pub struct WalStore {
    memory: Arc<InMemoryStore>,
    wal_tx: mpsc::Sender<WalCommand>,
    path: PathBuf,
}

impl WalStore {
    /// Replay `path` and start the writer task. Must be called inside a tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&path)?;
        let memory = Arc::new(InMemoryStore::new());
        for event in &events {
            memory.apply_event(event);
        }
        info!(
            "replayed {} WAL events from {}, {} reservations live",
            events.len(),
            path.display(),
            memory.len()
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, memory.clone(), wal_rx));

        Ok(Self { memory, wal_tx, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves once the event is on disk and visible in the read model.
    async fn commit(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Write("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Write("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Write(e.to_string()))
    }

    /// Rewrite the WAL as one `ReservationPlaced` per live reservation. The
    /// snapshot is taken by the writer, after every append queued ahead of it.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| StoreError::Write("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Write("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Write(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        self.memory.get(id).await
    }

    async fn list(&self) -> Result<Vec<Reservation>, StoreError> {
        self.memory.list().await
    }

    async fn insert(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        let reservation = new.with_id(Ulid::new());
        self.commit(Event::placed(&reservation)).await?;
        Ok(reservation)
    }

    async fn update(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if self.memory.get(reservation.id).await?.is_none() {
            return Err(StoreError::Missing(reservation.id));
        }
        self.commit(Event::modified(reservation)).await
    }

    async fn delete(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if self.memory.get(reservation.id).await?.is_none() {
            return Err(StoreError::Missing(reservation.id));
        }
        self.commit(Event::ReservationCancelled { id: reservation.id }).await
    }
}

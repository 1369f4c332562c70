use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::{StoreError, WalStore};
use crate::observability::WAL_COMPACTIONS_TOTAL;

const COMPACT_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            warn!("WAL compaction of {} failed: {e}", store.path().display());
        }
    }
}

/// Compact when `threshold` or more appends landed since the last rewrite.
/// Returns whether a compaction ran.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    store.compact().await?;
    metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReservationStore;
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("daybook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn candidate(date: &str) -> Candidate {
        Candidate::new(date.parse().unwrap(), 1)
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = WalStore::open(path.clone()).unwrap();

        let first = store
            .insert(NewReservation::from_candidate(&candidate("2026-10-20")))
            .await
            .unwrap();
        assert!(!compact_if_due(&store, 3).await.unwrap());

        store.delete(&first).await.unwrap();
        store
            .insert(NewReservation::from_candidate(&candidate("2026-10-22")))
            .await
            .unwrap();
        assert!(compact_if_due(&store, 3).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 0);

        let events = crate::wal::Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::ReservationPlaced { .. }));
    }
}

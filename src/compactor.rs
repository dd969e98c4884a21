use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, EngineError};

/// Compact the WAL once more than `threshold` events were appended since the
/// last compaction. Returns whether it compacted.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends <= threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

/// Background task that periodically checks whether the WAL needs compacting.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            tracing::warn!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReservationDraft;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("taloyhtio_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn laundry(start: &str, end: &str) -> ReservationDraft {
        ReservationDraft {
            category: "laundry".into(),
            date: "2026-06-01".into(),
            start_time: start.into(),
            end_time: end.into(),
            booker_name: "Pekka".into(),
            apartment: "C 21".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let engine = Engine::new(test_wal_path("threshold.wal")).unwrap();

        let r = engine.create_reservation(&laundry("07:00", "08:00")).await.unwrap();
        engine.cancel_reservation(r.id).await.unwrap();
        assert!(!compact_if_needed(&engine, 2).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 2);

        engine.create_reservation(&laundry("09:00", "10:00")).await.unwrap();
        assert!(compact_if_needed(&engine, 2).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.reservation_count(), 1);
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the tenant's WAL once at least `threshold` events were appended
/// since the last compaction. Returns whether it compacted.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appended} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps one tenant's WAL from growing without bound.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{BusinessHours, SystemClock};
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("chairtime_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(
            path.clone(),
            Arc::new(NotifyHub::new()),
            BusinessHours::default(),
            Arc::new(SystemClock::utc()),
        )
        .unwrap();

        let pid = Ulid::new();
        engine.create_provider(pid, None).await.unwrap();
        for weekday in 0..6u8 {
            engine.set_working_day(pid, weekday, weekday % 2 == 0).await.unwrap();
        }
        assert!(!compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 7);

        assert!(compact_if_due(&engine, 7).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // The template survives as part of the provider snapshot.
        let template = engine.get_template(pid).await.unwrap();
        drop(engine);
        let reopened = Engine::new(
            path,
            Arc::new(NotifyHub::new()),
            BusinessHours::default(),
            Arc::new(SystemClock::utc()),
        )
        .unwrap();
        assert_eq!(reopened.get_template(pid).await.unwrap(), template);
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::drafts::DraftStore;
use crate::engine::Engine;

pub const DRAFT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that periodically drops expired drafts.
pub async fn run_draft_sweeper(drafts: Arc<DraftStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_drafts(&drafts);
    }
}

fn sweep_drafts(drafts: &DraftStore) -> usize {
    let purged = drafts.purge_expired();
    if purged > 0 {
        info!(purged, remaining = drafts.len(), "expired drafts swept");
    }
    purged
}

/// Background task that rewrites the journal once enough events pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        maybe_compact(&engine, threshold).await;
    }
}

async fn maybe_compact(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.journal_appends_since_compact().await;
    if threshold == 0 || appends < threshold {
        return false;
    }
    match engine.compact_journal().await {
        Ok(()) => {
            info!(appends, "journal compaction finished");
            true
        }
        Err(e) => {
            // Retried on the next tick.
            tracing::warn!(error = %e, "journal compaction failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn d(s: &str) -> Date {
        s.parse().unwrap()
    }

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn sweeper_drops_only_expired_drafts() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let drafts = DraftStore::new(Duration::from_secs(60), clock.clone());
        let stay = Stay::new(d("2024-01-01"), d("2024-01-03"));

        drafts.start("stale", stay).unwrap();
        clock.advance(chrono::Duration::seconds(45));
        drafts.start("live", stay).unwrap();
        clock.advance(chrono::Duration::seconds(30));

        assert_eq!(sweep_drafts(&drafts), 1);
        assert!(drafts.get("live").is_some());
        assert_eq!(sweep_drafts(&drafts), 0);
    }

    #[tokio::test]
    async fn compactor_waits_for_threshold() {
        let path = test_wal_path("compactor_threshold.wal");
        let engine = Engine::open(&path).unwrap();
        let room = engine.create_room("Garden").await.unwrap();
        for day in 1..=3 {
            let block = engine
                .add_block(room.id, d(&format!("2024-05-0{day}")))
                .await
                .unwrap();
            engine.remove_block(block.id).await.unwrap();
        }
        let before = engine.journal_appends_since_compact().await;
        assert_eq!(before, 7);

        assert!(!maybe_compact(&engine, 100).await);
        assert!(maybe_compact(&engine, 5).await);
        assert_eq!(engine.journal_appends_since_compact().await, 0);

        drop(engine);
        let reopened = Engine::open(&path).unwrap();
        assert_eq!(reopened.all_rooms().await.unwrap(), vec![room.clone()]);
        assert!(
            reopened
                .get_restrictions_for_room_by_date(room.id, d("2024-05-01"), d("2024-05-31"))
                .await
                .unwrap()
                .is_empty()
        );
    }
}

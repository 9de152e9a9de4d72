use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that rewrites the WAL once enough appends accumulate.
/// Approval chains and notification fan-out make the log grow much faster
/// than the live state, so periodic compaction keeps restarts fast.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("aula_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("preserves_state.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path.clone(), notify, None).unwrap());

        let hid = Ulid::new();
        engine
            .create_hall(
                hid,
                "Seminar Hall A2".into(),
                Block::A,
                HallType::SmartClassroom,
                80,
                Equipment::default(),
            )
            .await
            .unwrap();
        assert!(engine.wal_appends_since_compact().await >= 1);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // A fresh engine replaying the compacted WAL still has the hall.
        let reopened = Engine::new(path.clone(), Arc::new(NotifyHub::new()), None).unwrap();
        assert!(reopened.get_hall(&hid).is_some());

        let _ = std::fs::remove_file(&path);
    }
}

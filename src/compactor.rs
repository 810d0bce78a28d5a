use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::{StoreError, WalStore};

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that compacts the item WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when at least `threshold` appends happened since the last compaction.
/// Returns whether a compaction ran.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold.max(1) {
        return Ok(false);
    }
    store.compact().await?;
    info!("compacted after {appends} appends");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::ItemStore;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("camperbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn van(owner: UserId) -> Item {
        Item::new(
            Ulid::new(),
            owner,
            NewItem {
                title: "Van".into(),
                description: None,
                price_per_day: Price::from_cents(5_000),
                image: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = WalStore::open(&path).unwrap();
        let owner = Ulid::new();

        store.create_item(van(owner)).await.unwrap();
        store.create_item(van(owner)).await.unwrap();
        assert!(!compact_if_due(&store, 3).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 2);

        store.create_item(van(owner)).await.unwrap();
        assert!(compact_if_due(&store, 3).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 0);
        drop(store);

        let reopened = WalStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 3);
    }

    #[tokio::test]
    async fn zero_threshold_still_needs_an_append() {
        let path = test_wal_path("zero.wal");
        let store = WalStore::open(&path).unwrap();
        assert!(!compact_if_due(&store, 0).await.unwrap());
    }
}

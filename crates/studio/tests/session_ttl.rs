mod common;

use common::{Fixture, SALES, USER};
use std::sync::Arc;
use std::time::Duration;
use studio::ops::{DropColumnsParams, Operation};
use studio::{MemoryCache, StudioConfig, StudioError};

fn config(ttl_secs: u64) -> StudioConfig {
    StudioConfig {
        session_ttl_secs: ttl_secs,
        ..StudioConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_expires() {
    let cache = Arc::new(MemoryCache::new());
    let fx = Fixture::with(config(60), cache.clone());
    let _ = fx.store.initialize(USER, SALES).await.unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;
    let err = fx.store.status(USER, SALES).await.unwrap_err();
    assert!(matches!(err, StudioError::NotFound { .. }));
    // The snapshot blob expired alongside the metadata.
    assert_eq!(cache.purge_expired(), 1);
    assert!(cache.is_empty());

    // An expired session can be started again.
    let _ = fx.store.initialize(USER, SALES).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_every_access_slides_the_expiry() {
    let cache = Arc::new(MemoryCache::new());
    let fx = Fixture::with(config(60), cache.clone());
    let _ = fx.store.initialize(USER, SALES).await.unwrap();
    let op = Operation::DropColumns(DropColumnsParams {
        columns: vec!["city".into()],
    });
    let _ = fx.store.apply(USER, SALES, op).await.unwrap();
    let _ = fx.store.undo(USER, SALES).await.unwrap();

    // Keep reading every 40s; the session outlives several TTLs.
    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(40)).await;
        let info = fx.store.status(USER, SALES).await.unwrap();
        assert_eq!(info.history_len, 2);
    }

    // Snapshot blobs were refreshed too, including the redo tail.
    let view = fx.store.redo(USER, SALES).await.unwrap();
    assert_eq!(view.batch.num_columns(), 3);
    assert_eq!(cache.len(), 3);
}

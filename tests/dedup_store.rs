use forwarder::config::DatabaseSettings;
use forwarder::store::{AddOutcome, DedupStore, SqliteDedupStore, StoreError};
use std::sync::Arc;

async fn file_store(dir: &tempfile::TempDir) -> Result<SqliteDedupStore, StoreError> {
    let path = dir.path().join("forwarder.db");
    SqliteDedupStore::connect(&DatabaseSettings {
        url: format!("sqlite://{}", path.display()),
        max_connections: 4,
        acquire_timeout_secs: 5,
    })
    .await
}

#[tokio::test]
async fn test_records_persist_across_reconnect() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    let store = file_store(&dir).await?;
    assert_eq!(store.add(0xDEAD_BEEF, "abc", 1, 10).await?, AddOutcome::Inserted);
    store.close().await;

    let store = file_store(&dir).await?;
    assert_eq!(store.add(0xDEAD_BEEF, "xyz", 1, 11).await?, AddOutcome::Duplicate);
    assert_eq!(store.delete("abc", 1).await?, Some(10));
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_adds_insert_once() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(file_store(&dir).await?);

    let mut handles = Vec::new();
    for message_id in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.add(42, "same-bytes", 7, message_id).await
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await?? == AddOutcome::Inserted {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(store.count().await?, 1);
    store.close().await;
    Ok(())
}

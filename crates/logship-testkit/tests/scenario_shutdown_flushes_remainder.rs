//! S7-shaped scenario: a stop signal during steady-state ingest causes a
//! final flush, and every admitted record ends up committed (spec §8,
//! scenario S7; invariant 7's success case `receivedCount == insertedCount`).

use std::time::Duration;

use logship_ingest::Batcher;
use logship_model::{LogRecord, PushType, RawFields};
use logship_testkit::FakeStore;
use tokio::sync::broadcast;

fn record() -> LogRecord {
    let raw = RawFields {
        output: "shutting down".into(),
        service: "auth".into(),
        ..Default::default()
    };
    LogRecord::from_fields(
        raw,
        "app1".into(),
        "login".into(),
        PushType::Udp,
        chrono::Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
async fn sigterm_during_ingest_flushes_final_batch() {
    let store = FakeStore::new();
    // batch_size high enough that the size trigger never fires on its own.
    let batcher = Batcher::new(store.clone(), 100, 100);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let flusher = batcher.spawn_flusher(Duration::from_secs(3600), shutdown_rx);

    for _ in 0..7 {
        batcher.admit(record()).await;
    }
    assert_eq!(batcher.inserted_count(), 0);

    shutdown_tx.send(()).unwrap();
    flusher.await.unwrap();

    assert_eq!(batcher.received_count(), 7);
    assert_eq!(batcher.inserted_count(), 7);
    assert_eq!(store.committed_records().len(), 7);
}

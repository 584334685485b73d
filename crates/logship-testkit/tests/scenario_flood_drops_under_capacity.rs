//! S6-shaped scenario: a flood of admissions against a buffer far smaller
//! than the flood drops the overflow without corrupting committed batches
//! (spec §8, scenario S6; invariant 4, buffer size never exceeds capacity).

use logship_ingest::Batcher;
use logship_model::{LogRecord, PushType, RawFields};
use logship_testkit::FakeStore;

fn record(n: usize) -> LogRecord {
    let raw = RawFields {
        output: format!("event-{n}"),
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
async fn flood_past_capacity_drops_without_duplicating_committed_records() {
    let store = FakeStore::new();
    // Small buffer, generous batch size: admissions outrun flushes and some
    // are rejected once the buffer is at capacity.
    let batcher = Batcher::new(store.clone(), 1000, 50);

    let mut admitted = 0usize;
    for n in 0..10_000 {
        if batcher.admit(record(n)).await {
            admitted += 1;
        }
    }
    batcher.flush().await;

    assert!(admitted <= 10_000);
    assert_eq!(batcher.received_count(), admitted as u64);
    assert_eq!(batcher.inserted_count(), admitted as u64);

    let committed = store.committed_records();
    assert_eq!(committed.len(), admitted);
    let unique: std::collections::HashSet<_> = committed.iter().map(|r| r.output.clone()).collect();
    assert_eq!(unique.len(), committed.len(), "no duplicate records in committed batches");
}

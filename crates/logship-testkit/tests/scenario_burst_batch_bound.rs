//! S4-shaped scenario: a burst of records far larger than BATCH_SIZE
//! produces a bounded number of batches, and every record is eventually
//! committed (spec §8, invariant 5 and scenario S4).

use logship_ingest::Batcher;
use logship_model::{LogRecord, PushType, RawFields};
use logship_testkit::FakeStore;

fn record(n: usize) -> LogRecord {
    let raw = RawFields {
        output: format!("line {n}"),
        service: "auth".into(),
        ..Default::default()
    };
    LogRecord::from_fields(
        raw,
        "app1".into(),
        "login".into(),
        PushType::Tcp,
        chrono::Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
async fn burst_of_200_stays_within_batch_bound() {
    let store = FakeStore::new();
    let batcher = Batcher::new(store.clone(), 20, 1000);

    for n in 0..200 {
        assert!(batcher.admit(record(n)).await);
    }
    batcher.flush().await; // drain any partial remainder

    assert_eq!(batcher.received_count(), 200);
    assert_eq!(batcher.inserted_count(), 200);
    assert_eq!(store.committed_records().len(), 200);
    assert!(store.batch_count() <= 200usize.div_ceil(20) + 1);
}

//! File-backed store behavior: schema provisioning, persistence across
//! reopen, and aggregate consistency under the recompute contract.

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use bottlewatch::{
    DetectionEvent, EventStore, ShapeStatus, SqliteEventStore, StorageError, WaterLevel,
};

fn event(serial: &str, water: WaterLevel, shape: ShapeStatus) -> DetectionEvent {
    DetectionEvent::new(
        serial.to_string(),
        Utc.with_ymd_and_hms(2025, 7, 14, 8, 15, 0).unwrap(),
        water,
        shape,
        0.88,
        vec![0xFF, 0xD8, 0x00, 0x11],
    )
}

#[test]
fn events_survive_a_reopen() {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("line.db");
    let db_path = db_path.to_str().unwrap();

    {
        let mut store = SqliteEventStore::open(db_path).expect("open");
        store
            .append(&event("BTL-20250714081500-QQQQQ1", WaterLevel::Full, ShapeStatus::Perfect))
            .expect("append");
    }

    let store = SqliteEventStore::open(db_path).expect("reopen");
    let events = store.recent(10).expect("recent");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].serial, "BTL-20250714081500-QQQQQ1");
    assert_eq!(events[0].evidence_jpeg, vec![0xFF, 0xD8, 0x00, 0x11]);

    let date = events[0].detected_at.date_naive();
    let agg = store.aggregates(date).expect("aggregates").expect("row");
    assert_eq!(agg.total, 1);
    assert_eq!(agg.perfect, 1);
}

#[test]
fn schema_provisioning_is_idempotent() {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("line.db");
    let db_path = db_path.to_str().unwrap();

    let mut store = SqliteEventStore::open(db_path).expect("open");
    store.ensure_schema().expect("first ensure");
    store.ensure_schema().expect("second ensure");

    store
        .append(&event("BTL-20250714081500-QQQQQ2", WaterLevel::Low, ShapeStatus::Perfect))
        .expect("append after re-ensure");
}

#[test]
fn aggregates_always_equal_a_recount() {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("line.db");
    let db_path = db_path.to_str().unwrap();

    let mut store = SqliteEventStore::open(db_path).expect("open");
    let mix = [
        ("BTL-20250714081500-WWWWW1", WaterLevel::Full, ShapeStatus::Perfect),
        ("BTL-20250714081500-WWWWW2", WaterLevel::Overflow, ShapeStatus::Perfect),
        ("BTL-20250714081500-WWWWW3", WaterLevel::Low, ShapeStatus::Perfect),
        ("BTL-20250714081500-WWWWW4", WaterLevel::Full, ShapeStatus::Defective),
        ("BTL-20250714081500-WWWWW5", WaterLevel::Full, ShapeStatus::Defective),
    ];

    let date = Utc.with_ymd_and_hms(2025, 7, 14, 8, 15, 0).unwrap().date_naive();
    let mut expected_total = 0;
    for (serial, water, shape) in mix {
        store.append(&event(serial, water, shape)).expect("append");
        expected_total += 1;

        // The aggregate row must be exact after every single append.
        let agg = store.aggregates(date).expect("aggregates").expect("row");
        assert_eq!(agg.total, expected_total);
    }

    let agg = store.aggregates(date).expect("aggregates").expect("row");
    assert_eq!(agg.total, 5);
    assert_eq!(agg.perfect, 1);
    assert_eq!(agg.defective, 4);
    assert_eq!(agg.overflow, 1);
    assert_eq!(agg.low, 1);
}

#[test]
fn duplicate_serials_are_rejected_across_connections() {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("line.db");
    let db_path = db_path.to_str().unwrap();

    {
        let mut store = SqliteEventStore::open(db_path).expect("open");
        store
            .append(&event("BTL-20250714081500-DUPDUP", WaterLevel::Full, ShapeStatus::Perfect))
            .expect("append");
    }

    let mut store = SqliteEventStore::open(db_path).expect("reopen");
    let err = store
        .append(&event("BTL-20250714081500-DUPDUP", WaterLevel::Full, ShapeStatus::Perfect))
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateSerial(_)));
}

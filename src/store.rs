//! Event persistence and daily aggregates.
//!
//! Each append runs in one transaction: the event row is inserted and the
//! day's aggregate row is recomputed from the event rows, so event and
//! aggregate are never partially visible and the counters cannot drift
//! from incremental-update bugs.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::{DetectionEvent, ShapeStatus, WaterLevel};

/// One row per calendar date, recomputed on every append for that date.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub total: u64,
    pub defective: u64,
    pub perfect: u64,
    pub overflow: u64,
    pub low: u64,
}

/// Lifetime counters across all recorded bottles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreTotals {
    pub total: u64,
    pub perfect: u64,
    pub defective: u64,
}

/// Persistence contract consumed by the pipeline.
pub trait EventStore: Send {
    /// Append an event and refresh its day's aggregate, atomically.
    fn append(&mut self, event: &DetectionEvent) -> Result<(), StorageError>;

    /// Most recent events, newest first (insertion order preserved).
    fn recent(&self, limit: usize) -> Result<Vec<DetectionEvent>, StorageError>;

    /// Aggregate row for a calendar date, if any events exist for it.
    fn aggregates(&self, date: NaiveDate) -> Result<Option<DailyAggregate>, StorageError>;

    /// Lifetime totals.
    fn totals(&self) -> Result<StoreTotals, StorageError>;
}

pub struct SqliteEventStore {
    conn: Connection,
}

impl SqliteEventStore {
    pub fn open(db_path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)
            .map_err(|e| StorageError::Unavailable(format!("{db_path}: {e}")))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Idempotent schema provisioning. Invoked at open and by `setup_db`.
    pub fn ensure_schema(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS bottles (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              serial TEXT NOT NULL UNIQUE,
              detected_at TEXT NOT NULL,
              water_level TEXT NOT NULL,
              shape_status TEXT NOT NULL,
              confidence REAL NOT NULL,
              is_defective INTEGER NOT NULL,
              evidence_jpeg BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_stats (
              date TEXT PRIMARY KEY,
              total INTEGER NOT NULL DEFAULT 0,
              defective INTEGER NOT NULL DEFAULT 0,
              perfect INTEGER NOT NULL DEFAULT 0,
              overflow INTEGER NOT NULL DEFAULT 0,
              low INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_bottles_detected ON bottles(detected_at);
            CREATE INDEX IF NOT EXISTS idx_bottles_defective ON bottles(is_defective);
            "#,
        )?;
        Ok(())
    }

    fn row_to_event(
        serial: String,
        detected_at: String,
        water_level: String,
        shape_status: String,
        confidence: f64,
        is_defective: bool,
        evidence_jpeg: Vec<u8>,
    ) -> Result<DetectionEvent, StorageError> {
        let detected_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&detected_at)
            .map_err(|e| StorageError::Corrupt(format!("bottles.detected_at: {e}")))?
            .with_timezone(&Utc);
        let water_level = WaterLevel::parse(&water_level)
            .ok_or_else(|| StorageError::Corrupt(format!("bottles.water_level: {water_level}")))?;
        let shape_status = ShapeStatus::parse(&shape_status)
            .ok_or_else(|| StorageError::Corrupt(format!("bottles.shape_status: {shape_status}")))?;
        Ok(DetectionEvent {
            serial,
            detected_at,
            water_level,
            shape_status,
            confidence: confidence as f32,
            is_defective,
            evidence_jpeg,
        })
    }
}

impl EventStore for SqliteEventStore {
    fn append(&mut self, event: &DetectionEvent) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        let insert = tx.execute(
            r#"
            INSERT INTO bottles(serial, detected_at, water_level, shape_status,
                                confidence, is_defective, evidence_jpeg)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                event.serial,
                event.detected_at.to_rfc3339(),
                event.water_level.as_str(),
                event.shape_status.as_str(),
                event.confidence as f64,
                event.is_defective,
                event.evidence_jpeg,
            ],
        );
        if let Err(e) = insert {
            return Err(map_serial_conflict(e, &event.serial));
        }

        // Recompute the day's counters from the source rows; RFC 3339
        // timestamps start with the date key.
        let date_key = event.detected_at.date_naive().to_string();
        tx.execute(
            r#"
            INSERT INTO daily_stats (date, total, defective, perfect, overflow, low)
            SELECT ?1,
                   COUNT(*),
                   COALESCE(SUM(is_defective), 0),
                   COALESCE(SUM(is_defective = 0), 0),
                   COALESCE(SUM(water_level = 'overflow'), 0),
                   COALESCE(SUM(water_level = 'low'), 0)
            FROM bottles
            WHERE substr(detected_at, 1, 10) = ?1
            ON CONFLICT(date) DO UPDATE SET
              total = excluded.total,
              defective = excluded.defective,
              perfect = excluded.perfect,
              overflow = excluded.overflow,
              low = excluded.low
            "#,
            params![date_key],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<DetectionEvent>, StorageError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT serial, detected_at, water_level, shape_status,
                   confidence, is_defective, evidence_jpeg
            FROM bottles ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, Vec<u8>>(6)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (serial, detected_at, water, shape, confidence, defective, jpeg) = row?;
            events.push(Self::row_to_event(
                serial,
                detected_at,
                water,
                shape,
                confidence,
                defective,
                jpeg,
            )?);
        }
        Ok(events)
    }

    fn aggregates(&self, date: NaiveDate) -> Result<Option<DailyAggregate>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT total, defective, perfect, overflow, low FROM daily_stats WHERE date = ?1",
                params![date.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(total, defective, perfect, overflow, low)| DailyAggregate {
            date,
            total: total.max(0) as u64,
            defective: defective.max(0) as u64,
            perfect: perfect.max(0) as u64,
            overflow: overflow.max(0) as u64,
            low: low.max(0) as u64,
        }))
    }

    fn totals(&self) -> Result<StoreTotals, StorageError> {
        let (total, defective, perfect) = self.conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(is_defective), 0),
                   COALESCE(SUM(is_defective = 0), 0)
            FROM bottles
            "#,
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;
        Ok(StoreTotals {
            total: total.max(0) as u64,
            perfect: perfect.max(0) as u64,
            defective: defective.max(0) as u64,
        })
    }
}

fn map_serial_conflict(err: rusqlite::Error, serial: &str) -> StorageError {
    if let rusqlite::Error::SqliteFailure(e, Some(msg)) = &err {
        if e.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains("bottles.serial") {
            return StorageError::DuplicateSerial(serial.to_string());
        }
    }
    StorageError::Backend(err)
}

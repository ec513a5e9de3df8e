//! bottlewatch
//!
//! Real-time visual quality control for a bottling line. A camera worker
//! feeds frames into a detection pipeline that locates a bottle, classifies
//! its water level and shape, assigns a traceable serial, and persists the
//! result with an evidence image and rolling daily statistics.
//!
//! # Architecture
//!
//! One pipeline pass per frame:
//!
//! 1. `roi`: edge/contour analysis extracts the bottle region, or nothing.
//! 2. `enhance`: CLAHE on the luma plane corrects conveyor lighting.
//! 3. `classify`: two classifier heads (water level, shape) with confidence
//!    fusion.
//! 4. `gate`: cooldown + confidence threshold decide whether the candidate
//!    becomes a committed event.
//! 5. `serial` + `store`: admitted events get a serial and are written to
//!    SQLite together with the day's recomputed aggregate row.
//!
//! # Module Structure
//!
//! - `camera`: frame sources and the latest-wins producer worker
//! - `pipeline`: the per-frame orchestration and its public contract
//! - `store`: event persistence and daily aggregates
//! - `overlay`: display-frame annotations for the presentation layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod camera;
pub mod classify;
pub mod config;
pub mod enhance;
pub mod error;
pub mod frame;
pub mod gate;
pub mod overlay;
pub mod pipeline;
pub mod roi;
pub mod serial;
pub mod store;

pub use camera::{CameraWorker, FrameSource, SourceStats, SyntheticSource};
pub use classify::{
    ClassifierBackend, ClassifierEnsemble, Prediction, PredictionSet, StubClassifier,
};
pub use config::LineConfig;
pub use enhance::ImageEnhancer;
pub use error::{PipelineError, StorageError};
pub use frame::{BoundingBox, Frame, Region};
pub use gate::{Clock, DetectionGate, GateDecision, ManualClock, SystemClock};
pub use overlay::DisplayFrame;
pub use pipeline::DetectionPipeline;
pub use roi::RegionExtractor;
pub use serial::{validate_serial, SerialAllocator};
pub use store::{DailyAggregate, EventStore, SqliteEventStore, StoreTotals};

// -------------------- Labels --------------------

/// Water-level classification vocabulary.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WaterLevel {
    Low,
    Full,
    Overflow,
}

impl WaterLevel {
    /// All labels, in model-output order.
    pub const ALL: [WaterLevel; 3] = [WaterLevel::Low, WaterLevel::Full, WaterLevel::Overflow];

    pub fn as_str(&self) -> &'static str {
        match self {
            WaterLevel::Low => "low",
            WaterLevel::Full => "full",
            WaterLevel::Overflow => "overflow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(WaterLevel::Low),
            "full" => Some(WaterLevel::Full),
            "overflow" => Some(WaterLevel::Overflow),
            _ => None,
        }
    }
}

/// Shape classification vocabulary.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ShapeStatus {
    Perfect,
    Defective,
}

impl ShapeStatus {
    /// All labels, in model-output order.
    pub const ALL: [ShapeStatus; 2] = [ShapeStatus::Perfect, ShapeStatus::Defective];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeStatus::Perfect => "perfect",
            ShapeStatus::Defective => "defective",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "perfect" => Some(ShapeStatus::Perfect),
            "defective" => Some(ShapeStatus::Defective),
            _ => None,
        }
    }
}

/// A bottle is defective unless it is exactly full and perfectly shaped.
pub fn is_defective(water_level: WaterLevel, shape_status: ShapeStatus) -> bool {
    water_level != WaterLevel::Full || shape_status == ShapeStatus::Defective
}

// -------------------- Detection Events --------------------

/// The unit of record: one admitted detection. Immutable once persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub serial: String,
    pub detected_at: DateTime<Utc>,
    pub water_level: WaterLevel,
    pub shape_status: ShapeStatus,
    /// Fused confidence in [0, 1].
    pub confidence: f32,
    pub is_defective: bool,
    /// JPEG-encoded evidence image of the enhanced region.
    pub evidence_jpeg: Vec<u8>,
}

impl DetectionEvent {
    /// Build an event; `is_defective` is derived, never caller-supplied.
    pub fn new(
        serial: String,
        detected_at: DateTime<Utc>,
        water_level: WaterLevel,
        shape_status: ShapeStatus,
        confidence: f32,
        evidence_jpeg: Vec<u8>,
    ) -> Self {
        Self {
            serial,
            detected_at,
            water_level,
            shape_status,
            confidence,
            is_defective: is_defective(water_level, shape_status),
            evidence_jpeg,
        }
    }

    /// Swap in a freshly allocated serial (duplicate-serial retry path).
    pub(crate) fn with_serial(mut self, serial: String) -> Self {
        self.serial = serial;
        self
    }
}

// -------------------- Tests --------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defect_derivation_matches_label_table() {
        assert!(!is_defective(WaterLevel::Full, ShapeStatus::Perfect));
        assert!(is_defective(WaterLevel::Full, ShapeStatus::Defective));
        assert!(is_defective(WaterLevel::Low, ShapeStatus::Perfect));
        assert!(is_defective(WaterLevel::Overflow, ShapeStatus::Perfect));
        assert!(is_defective(WaterLevel::Overflow, ShapeStatus::Defective));
    }

    #[test]
    fn event_constructor_derives_defect_flag() {
        let ev = DetectionEvent::new(
            "BTL-20250101120000-ABC123".to_string(),
            Utc::now(),
            WaterLevel::Overflow,
            ShapeStatus::Perfect,
            0.91,
            Vec::new(),
        );
        assert!(ev.is_defective);

        let ev = DetectionEvent::new(
            "BTL-20250101120001-ABC124".to_string(),
            Utc::now(),
            WaterLevel::Full,
            ShapeStatus::Perfect,
            0.91,
            Vec::new(),
        );
        assert!(!ev.is_defective);
    }

    #[test]
    fn labels_round_trip_through_strings() {
        for level in WaterLevel::ALL {
            assert_eq!(WaterLevel::parse(level.as_str()), Some(level));
        }
        for shape in ShapeStatus::ALL {
            assert_eq!(ShapeStatus::parse(shape.as_str()), Some(shape));
        }
        assert_eq!(WaterLevel::parse("empty"), None);
    }
}

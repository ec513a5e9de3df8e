//! Per-frame detection pipeline.
//!
//! Orchestrates extract → enhance → classify → gate → persist for one frame
//! at a time. The pipeline runs on a dedicated worker; nothing here blocks
//! a UI thread. Storage failures degrade gracefully: the pass reports its
//! failure and the pipeline keeps running.

use chrono::{NaiveDate, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::classify::ClassifierEnsemble;
use crate::config::LineConfig;
use crate::enhance::ImageEnhancer;
use crate::error::{PipelineError, StorageError};
use crate::frame::Frame;
use crate::gate::{Clock, DetectionGate, GateDecision, SystemClock};
use crate::overlay::{self, DisplayFrame};
use crate::roi::RegionExtractor;
use crate::serial::SerialAllocator;
use crate::store::{DailyAggregate, EventStore, SqliteEventStore, StoreTotals};
use crate::DetectionEvent;

const EVIDENCE_JPEG_QUALITY: u8 = 90;

pub struct DetectionPipeline {
    extractor: RegionExtractor,
    enhancer: ImageEnhancer,
    ensemble: ClassifierEnsemble,
    gate: DetectionGate,
    serials: SerialAllocator,
    store: Box<dyn EventStore>,
    reset_clears_cooldown: bool,
    current_serial: Option<String>,
}

impl DetectionPipeline {
    /// Build the production pipeline. Classifier assets and the event store
    /// are opened here; a missing model or unreachable database prevents
    /// startup instead of failing per frame.
    pub fn from_config(config: &LineConfig) -> Result<Self, PipelineError> {
        let ensemble = ClassifierEnsemble::from_config(&config.models)?;
        let store = SqliteEventStore::open(&config.db_path)?;
        Ok(Self::with_parts(
            config,
            ensemble,
            Box::new(store),
            Box::new(SystemClock::new()),
        ))
    }

    /// Assemble from explicit parts; the seam for tests and embedders.
    pub fn with_parts(
        config: &LineConfig,
        ensemble: ClassifierEnsemble,
        store: Box<dyn EventStore>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            extractor: RegionExtractor::new(
                config.detection.min_bottle_area,
                config.detection.roi_padding,
            ),
            enhancer: ImageEnhancer::default(),
            ensemble,
            gate: DetectionGate::new(
                config.detection.cooldown,
                config.detection.confidence_threshold,
                clock,
            ),
            serials: SerialAllocator::new(),
            store,
            reset_clears_cooldown: config.detection.reset_clears_cooldown,
            current_serial: None,
        }
    }

    /// Run one pass. The display frame always carries annotations; the
    /// second slot is the explicit persistence outcome for this pass:
    /// `Ok(Some(event))` on admission, `Ok(None)` when nothing was
    /// committed, `Err` when a candidate was admitted but could not be
    /// persisted. The pipeline itself stays usable after an `Err`.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
    ) -> (DisplayFrame, Result<Option<DetectionEvent>, StorageError>) {
        let mut display = frame.image.clone();

        let Some(region) = self.extractor.extract(&frame.image) else {
            return (Self::scanning(display), Ok(None));
        };

        // Malformed regions are skipped, not propagated: the line keeps
        // moving and the next frame gets a fresh chance.
        let enhanced = match self.enhancer.enhance(&region.image) {
            Ok(enhanced) => enhanced,
            Err(e) => {
                log::debug!("frame {}: region skipped: {e}", frame.seq);
                return (Self::scanning(display), Ok(None));
            }
        };
        let predictions = match self.ensemble.predict(&enhanced) {
            Ok(predictions) => predictions,
            Err(e) => {
                log::warn!("frame {}: classification skipped: {e}", frame.seq);
                return (Self::scanning(display), Ok(None));
            }
        };

        overlay::draw_candidate(&mut display, &region.bbox, &region.contour, &predictions);

        match self.gate.evaluate(predictions.overall_confidence) {
            GateDecision::RejectCooldown => {
                log::debug!("frame {}: rejected, cooldown window active", frame.seq);
                let caption = overlay::candidate_caption(&predictions, None);
                (DisplayFrame { image: display, caption }, Ok(None))
            }
            GateDecision::RejectLowConfidence => {
                log::debug!(
                    "frame {}: rejected, confidence {:.2} at or below threshold",
                    frame.seq,
                    predictions.overall_confidence
                );
                let caption = overlay::candidate_caption(&predictions, None);
                (DisplayFrame { image: display, caption }, Ok(None))
            }
            GateDecision::Admit => {
                let evidence = match encode_evidence(&enhanced) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::warn!("frame {}: evidence encoding failed: {e}", frame.seq);
                        let caption = overlay::candidate_caption(&predictions, None);
                        return (DisplayFrame { image: display, caption }, Ok(None));
                    }
                };
                let event = DetectionEvent::new(
                    self.serials.allocate(),
                    Utc::now(),
                    predictions.water_level.label,
                    predictions.shape.label,
                    predictions.overall_confidence,
                    evidence,
                );
                match self.persist(event) {
                    Ok(event) => {
                        // Cooldown starts only once the record is durable.
                        self.gate.commit();
                        self.current_serial = Some(event.serial.clone());
                        let caption =
                            overlay::candidate_caption(&predictions, Some(&event.serial));
                        (DisplayFrame { image: display, caption }, Ok(Some(event)))
                    }
                    Err(e) => {
                        log::error!("frame {}: event not persisted: {e}", frame.seq);
                        let caption = overlay::candidate_caption(&predictions, None);
                        (DisplayFrame { image: display, caption }, Err(e))
                    }
                }
            }
        }
    }

    /// Append with a single reallocate-and-retry on serial collision.
    fn persist(&mut self, event: DetectionEvent) -> Result<DetectionEvent, StorageError> {
        match self.store.append(&event) {
            Ok(()) => Ok(event),
            Err(e) if e.is_retryable() => {
                log::warn!("serial {} collided, reallocating once", event.serial);
                let event = event.with_serial(self.serials.allocate());
                self.store.append(&event)?;
                Ok(event)
            }
            Err(e) => Err(e),
        }
    }

    fn scanning(mut display: RgbImage) -> DisplayFrame {
        overlay::draw_scanning(&mut display);
        DisplayFrame {
            image: display,
            caption: overlay::SCANNING_CAPTION.to_string(),
        }
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<DetectionEvent>, StorageError> {
        self.store.recent(limit)
    }

    pub fn statistics(&self, date: NaiveDate) -> Result<Option<DailyAggregate>, StorageError> {
        self.store.aggregates(date)
    }

    pub fn totals(&self) -> Result<StoreTotals, StorageError> {
        self.store.totals()
    }

    /// Operator reset: clears the displayed detection; reopens the cooldown
    /// window only when `detection.reset_clears_cooldown` says so.
    pub fn reset(&mut self) {
        self.current_serial = None;
        self.gate.reset(self.reset_clears_cooldown);
    }

    /// Serial of the most recent admitted detection, until reset.
    pub fn current_serial(&self) -> Option<&str> {
        self.current_serial.as_deref()
    }
}

fn encode_evidence(image: &RgbImage) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, EVIDENCE_JPEG_QUALITY);
    image.write_with_encoder(encoder)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifierBackend;
    use crate::gate::ManualClock;
    use crate::store::SqliteEventStore;
    use crate::{ShapeStatus, WaterLevel};
    use image::Rgb;
    use std::time::Duration;

    struct FixedHead(Vec<f32>);

    impl ClassifierBackend for FixedHead {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn scores(&mut self, _pixels: &[u8], _w: u32, _h: u32) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    /// Store that fails every append a configured number of times.
    struct FlakyStore {
        inner: SqliteEventStore,
        failures_left: u32,
        failure: fn(&DetectionEvent) -> StorageError,
    }

    impl EventStore for FlakyStore {
        fn append(&mut self, event: &DetectionEvent) -> Result<(), StorageError> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err((self.failure)(event));
            }
            self.inner.append(event)
        }
        fn recent(&self, limit: usize) -> Result<Vec<DetectionEvent>, StorageError> {
            self.inner.recent(limit)
        }
        fn aggregates(&self, date: NaiveDate) -> Result<Option<DailyAggregate>, StorageError> {
            self.inner.aggregates(date)
        }
        fn totals(&self) -> Result<StoreTotals, StorageError> {
            self.inner.totals()
        }
    }

    fn bottle_frame() -> Frame {
        let mut image = RgbImage::from_pixel(640, 480, Rgb([20, 22, 26]));
        for y in 140..340 {
            for x in 260..380 {
                image.put_pixel(x, y, Rgb([225, 228, 235]));
            }
        }
        Frame::new(image, 1)
    }

    fn empty_frame() -> Frame {
        Frame::new(RgbImage::from_pixel(640, 480, Rgb([20, 22, 26])), 2)
    }

    fn full_perfect_ensemble() -> ClassifierEnsemble {
        ClassifierEnsemble::with_backends(
            Box::new(FixedHead(vec![0.05, 0.90, 0.05])),
            Box::new(FixedHead(vec![0.92, 0.08])),
            224,
        )
    }

    fn pipeline_with(
        ensemble: ClassifierEnsemble,
        store: Box<dyn EventStore>,
    ) -> (DetectionPipeline, ManualClock) {
        let clock = ManualClock::new();
        let pipeline = DetectionPipeline::with_parts(
            &LineConfig::default(),
            ensemble,
            store,
            Box::new(clock.clone()),
        );
        (pipeline, clock)
    }

    #[test]
    fn empty_frame_reports_scanning_and_no_event() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let (mut pipeline, _clock) = pipeline_with(full_perfect_ensemble(), Box::new(store));

        let (display, outcome) = pipeline.process_frame(&empty_frame());
        assert_eq!(display.caption, overlay::SCANNING_CAPTION);
        assert!(outcome.unwrap().is_none());
    }

    #[test]
    fn qualifying_bottle_is_admitted_end_to_end() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let (mut pipeline, _clock) = pipeline_with(full_perfect_ensemble(), Box::new(store));

        let (display, outcome) = pipeline.process_frame(&bottle_frame());
        let event = outcome.unwrap().expect("admitted event");

        assert_eq!(event.water_level, WaterLevel::Full);
        assert_eq!(event.shape_status, ShapeStatus::Perfect);
        assert!((event.confidence - 0.91).abs() < 1e-6);
        assert!(!event.is_defective);
        assert!(crate::validate_serial(&event.serial));
        // Evidence is a JPEG stream.
        assert_eq!(&event.evidence_jpeg[..2], &[0xFF, 0xD8]);
        assert!(display.caption.contains(&event.serial));

        assert_eq!(pipeline.current_serial(), Some(event.serial.as_str()));
        let today = Utc::now().date_naive();
        let agg = pipeline.statistics(today).unwrap().expect("aggregate");
        assert_eq!(agg.total, 1);
        assert_eq!(agg.perfect, 1);
    }

    #[test]
    fn cooldown_suppresses_duplicates_until_the_window_passes() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let (mut pipeline, clock) = pipeline_with(full_perfect_ensemble(), Box::new(store));

        let (_, first) = pipeline.process_frame(&bottle_frame());
        assert!(first.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        let (display, second) = pipeline.process_frame(&bottle_frame());
        assert!(second.unwrap().is_none());
        // The lingering bottle is still annotated, just not re-admitted.
        assert!(display.caption.contains("full"));

        clock.advance(Duration::from_secs(3));
        let (_, third) = pipeline.process_frame(&bottle_frame());
        assert!(third.unwrap().is_some());

        assert_eq!(pipeline.recent(10).unwrap().len(), 2);
    }

    #[test]
    fn fused_confidence_at_threshold_is_rejected() {
        // Both heads at 0.75 fuse to exactly the default threshold.
        let ensemble = ClassifierEnsemble::with_backends(
            Box::new(FixedHead(vec![0.125, 0.75, 0.125])),
            Box::new(FixedHead(vec![0.75, 0.25])),
            224,
        );
        let store = SqliteEventStore::open_in_memory().unwrap();
        let (mut pipeline, _clock) = pipeline_with(ensemble, Box::new(store));

        let (display, outcome) = pipeline.process_frame(&bottle_frame());
        assert!(outcome.unwrap().is_none());
        assert!(display.caption.contains("Conf: 0.75"));
    }

    #[test]
    fn storage_failure_is_reported_and_does_not_start_cooldown() {
        let store = FlakyStore {
            inner: SqliteEventStore::open_in_memory().unwrap(),
            failures_left: 1,
            failure: |_| StorageError::Unavailable("disk detached".to_string()),
        };
        let (mut pipeline, _clock) = pipeline_with(full_perfect_ensemble(), Box::new(store));

        let (_, outcome) = pipeline.process_frame(&bottle_frame());
        assert!(matches!(outcome, Err(StorageError::Unavailable(_))));

        // Gate never committed: the very next pass may admit.
        let (_, retry) = pipeline.process_frame(&bottle_frame());
        assert!(retry.unwrap().is_some());
    }

    #[test]
    fn duplicate_serial_is_retried_once_with_a_fresh_serial() {
        let store = FlakyStore {
            inner: SqliteEventStore::open_in_memory().unwrap(),
            failures_left: 1,
            failure: |ev| StorageError::DuplicateSerial(ev.serial.clone()),
        };
        let (mut pipeline, _clock) = pipeline_with(full_perfect_ensemble(), Box::new(store));

        let (_, outcome) = pipeline.process_frame(&bottle_frame());
        let event = outcome.unwrap().expect("event after retry");
        assert!(crate::validate_serial(&event.serial));
        assert_eq!(pipeline.recent(10).unwrap().len(), 1);
    }

    #[test]
    fn reset_clears_the_displayed_serial() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let (mut pipeline, _clock) = pipeline_with(full_perfect_ensemble(), Box::new(store));

        let (_, outcome) = pipeline.process_frame(&bottle_frame());
        assert!(outcome.unwrap().is_some());
        assert!(pipeline.current_serial().is_some());

        pipeline.reset();
        assert!(pipeline.current_serial().is_none());
        // Default config keeps the cooldown window closed after reset.
        let (_, after) = pipeline.process_frame(&bottle_frame());
        assert!(after.unwrap().is_none());
    }

    #[test]
    fn defective_candidates_are_recorded_as_defective() {
        let ensemble = ClassifierEnsemble::with_backends(
            Box::new(FixedHead(vec![0.02, 0.03, 0.95])), // overflow
            Box::new(FixedHead(vec![0.91, 0.09])),       // perfect shape
            224,
        );
        let store = SqliteEventStore::open_in_memory().unwrap();
        let (mut pipeline, _clock) = pipeline_with(ensemble, Box::new(store));

        let (_, outcome) = pipeline.process_frame(&bottle_frame());
        let event = outcome.unwrap().expect("event");
        assert_eq!(event.water_level, WaterLevel::Overflow);
        assert!(event.is_defective);
    }
}

//! Frame acquisition.
//!
//! Sources produce owned `Frame`s; the worker thread runs one source at the
//! configured rate and publishes into a single-slot, latest-wins channel.
//! A consumer slower than the camera sees only the newest frame; stale
//! frames are overwritten, never queued.
//!
//! Sources:
//! - `stub://<name>`: synthetic conveyor scene (tests, demo runs)
//! - `http(s)://...`: JPEG snapshot endpoint (feature `ingest-http`)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use image::{Rgb, RgbImage};

use crate::config::CameraSettings;
use crate::error::PipelineError;
use crate::frame::Frame;

/// Pull-based frame producer.
pub trait FrameSource: Send {
    /// Open the underlying device or stream.
    fn connect(&mut self) -> anyhow::Result<()>;

    /// Produce the next frame. Blocks at most one frame interval.
    fn next_frame(&mut self) -> anyhow::Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Build a source for the configured URL.
pub fn open_source(config: &CameraSettings) -> Result<Box<dyn FrameSource>, PipelineError> {
    if config.source.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }

    #[cfg(feature = "ingest-http")]
    {
        if config.source.starts_with("http://") || config.source.starts_with("https://") {
            return Ok(Box::new(http::HttpSource::new(config.clone())?));
        }
    }

    Err(PipelineError::Acquisition(format!(
        "unsupported camera source '{}'",
        config.source
    )))
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

/// Synthetic conveyor scene. Most frames are plain belt background; once
/// every few seconds a high-contrast bottle silhouette crosses the frame,
/// so a demo pipeline has something real to detect.
pub struct SyntheticSource {
    config: CameraSettings,
    frame_count: u64,
}

// Bottle visible for 1s out of every 3s at the nominal 30 fps.
const BOTTLE_CYCLE_FRAMES: u64 = 90;
const BOTTLE_VISIBLE_FRAMES: u64 = 30;

impl SyntheticSource {
    pub fn new(config: CameraSettings) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn render(&self) -> RgbImage {
        let (w, h) = (self.config.width, self.config.height);
        let mut image = RgbImage::from_pixel(w, h, Rgb([24, 26, 30]));

        if self.frame_count % BOTTLE_CYCLE_FRAMES < BOTTLE_VISIBLE_FRAMES {
            // Bottle silhouette: tall bright rectangle, roughly centered.
            let bw = (w / 5).max(8);
            let bh = (h * 3 / 5).max(8);
            let x0 = (w - bw) / 2;
            let y0 = (h - bh) / 2;
            for y in y0..(y0 + bh).min(h) {
                for x in x0..(x0 + bw).min(w) {
                    image.put_pixel(x, y, Rgb([225, 228, 235]));
                }
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> anyhow::Result<()> {
        log::info!("camera: connected to {} (synthetic)", self.config.source);
        Ok(())
    }

    fn next_frame(&mut self) -> anyhow::Result<Frame> {
        let image = self.render();
        self.frame_count += 1;
        Ok(Frame::new(image, self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.source.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// HTTP snapshot source
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-http")]
mod http {
    use super::*;
    use anyhow::Context;
    use image::imageops::{self, FilterType};
    use std::io::Read;

    // Snapshot endpoints serve one JPEG per request; phones running IP
    // camera apps expose exactly this shape.
    pub struct HttpSource {
        config: CameraSettings,
        url: url::Url,
        agent: ureq::Agent,
        frame_count: u64,
        consecutive_failures: u32,
    }

    const MAX_SNAPSHOT_BYTES: u64 = 8 * 1024 * 1024;

    impl HttpSource {
        pub fn new(config: CameraSettings) -> Result<Self, PipelineError> {
            let url = url::Url::parse(&config.source)
                .map_err(|e| PipelineError::Acquisition(format!("{}: {e}", config.source)))?;
            let agent = ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(5))
                .build();
            Ok(Self {
                config,
                url,
                agent,
                frame_count: 0,
                consecutive_failures: 0,
            })
        }

        fn fetch(&mut self) -> anyhow::Result<RgbImage> {
            let response = self
                .agent
                .get(self.url.as_str())
                .call()
                .with_context(|| format!("snapshot request to {}", self.url))?;
            let mut bytes = Vec::new();
            response
                .into_reader()
                .take(MAX_SNAPSHOT_BYTES)
                .read_to_end(&mut bytes)
                .context("read snapshot body")?;
            let decoded = image::load_from_memory(&bytes)
                .context("decode snapshot image")?
                .to_rgb8();
            if decoded.dimensions() == (self.config.width, self.config.height) {
                Ok(decoded)
            } else {
                Ok(imageops::resize(
                    &decoded,
                    self.config.width,
                    self.config.height,
                    FilterType::Triangle,
                ))
            }
        }
    }

    impl FrameSource for HttpSource {
        fn connect(&mut self) -> anyhow::Result<()> {
            // Probe once so startup failures surface immediately.
            self.fetch().context("initial snapshot probe")?;
            log::info!("camera: connected to {}", self.config.source);
            Ok(())
        }

        fn next_frame(&mut self) -> anyhow::Result<Frame> {
            match self.fetch() {
                Ok(image) => {
                    self.frame_count += 1;
                    self.consecutive_failures = 0;
                    Ok(Frame::new(image, self.frame_count))
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    Err(e)
                }
            }
        }

        fn is_healthy(&self) -> bool {
            self.consecutive_failures < 5
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.frame_count,
                source: self.config.source.clone(),
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Latest-wins handoff + producer worker
// ----------------------------------------------------------------------------

/// Single-slot channel between the producer thread and the pipeline.
#[derive(Clone, Default)]
pub struct FrameSlot {
    slot: Arc<Mutex<Option<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite whatever the consumer has not picked up yet.
    pub fn publish(&self, frame: Frame) {
        let mut slot = self.slot.lock().expect("frame slot poisoned");
        *slot = Some(frame);
    }

    /// Drain the newest frame, if any. Never blocks on the producer.
    pub fn take(&self) -> Option<Frame> {
        let mut slot = self.slot.lock().expect("frame slot poisoned");
        slot.take()
    }
}

/// Owns the producer thread. `stop` is guaranteed to release the source,
/// even when requested mid-frame: the flag is checked between captures and
/// the thread is joined before returning.
pub struct CameraWorker {
    slot: FrameSlot,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CameraWorker {
    /// Connect the source and start producing. A connect failure is an
    /// `Acquisition` error; nothing is spawned in that case.
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        target_fps: u32,
    ) -> Result<Self, PipelineError> {
        source
            .connect()
            .map_err(|e| PipelineError::Acquisition(e.to_string()))?;

        let slot = FrameSlot::new();
        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_millis(1000 / target_fps.max(1) as u64);

        let worker_slot = slot.clone();
        let worker_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !worker_stop.load(Ordering::Relaxed) {
                match source.next_frame() {
                    Ok(frame) => worker_slot.publish(frame),
                    Err(e) => log::warn!("camera: frame capture failed: {e}"),
                }
                std::thread::sleep(interval);
            }
            let stats = source.stats();
            log::info!(
                "camera: worker stopped after {} frames from {}",
                stats.frames_captured,
                stats.source
            );
            // Source dropped here, releasing the device/stream handle.
        });

        Ok(Self {
            slot,
            stop,
            handle: Some(handle),
        })
    }

    /// Newest unconsumed frame, or `None`. Never blocks on capture.
    pub fn latest(&self) -> Option<Frame> {
        self.slot.take()
    }

    /// Signal the worker, wait for the in-flight frame, release the source.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("camera: worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CameraWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_settings() -> CameraSettings {
        CameraSettings {
            source: "stub://test_line".to_string(),
            width: 320,
            height: 240,
            target_fps: 120,
        }
    }

    #[test]
    fn synthetic_source_produces_configured_dimensions() {
        let mut source = SyntheticSource::new(stub_settings());
        source.connect().unwrap();
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.width(), 320);
        assert_eq!(frame.height(), 240);
        assert_eq!(frame.seq, 1);
    }

    #[test]
    fn synthetic_scene_includes_a_bottle_phase() {
        let mut source = SyntheticSource::new(stub_settings());
        source.connect().unwrap();
        let mut saw_bottle = false;
        for _ in 0..BOTTLE_CYCLE_FRAMES {
            let frame = source.next_frame().unwrap();
            if frame.image.pixels().any(|p| p.0[0] > 200) {
                saw_bottle = true;
                break;
            }
        }
        assert!(saw_bottle, "bottle never crossed the synthetic scene");
    }

    #[test]
    fn frame_slot_keeps_only_the_newest_frame() {
        let slot = FrameSlot::new();
        slot.publish(Frame::new(RgbImage::new(4, 4), 1));
        slot.publish(Frame::new(RgbImage::new(4, 4), 2));

        let frame = slot.take().expect("frame");
        assert_eq!(frame.seq, 2);
        assert!(slot.take().is_none());
    }

    #[test]
    fn unsupported_source_is_an_acquisition_error() {
        let mut cfg = stub_settings();
        cfg.source = "rtsp://nope".to_string();
        let err = open_source(&cfg).err().expect("error");
        assert!(matches!(err, PipelineError::Acquisition(_)));
    }

    #[test]
    fn worker_publishes_and_stops_cleanly() {
        let source = open_source(&stub_settings()).unwrap();
        let mut worker = CameraWorker::spawn(source, 120).unwrap();

        let mut got_frame = false;
        for _ in 0..100 {
            if worker.latest().is_some() {
                got_frame = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        worker.stop();
        assert!(got_frame, "worker never published a frame");
    }
}

//! bottlewatchd - bottling-line quality-control daemon
//!
//! This daemon:
//! 1. Runs a camera worker that publishes frames into a latest-wins slot
//! 2. Feeds each frame through the detection pipeline
//! 3. Logs admitted events to the console (the headless operator view)
//! 4. Periodically logs today's aggregate statistics
//! 5. Shuts down cleanly on Ctrl-C: worker joined, camera released,
//!    database connection closed

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use bottlewatch::camera::open_source;
use bottlewatch::{CameraWorker, DetectionPipeline, LineConfig};

#[derive(Parser, Debug)]
#[command(name = "bottlewatchd", about = "Bottling-line quality-control daemon")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "BOTTLEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between statistics log lines.
    #[arg(long, default_value_t = 60)]
    stats_interval_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = LineConfig::load_from(args.config.as_deref()).context("load configuration")?;

    let mut pipeline = DetectionPipeline::from_config(&cfg)
        .context("start detection pipeline (check model assets and database path)")?;

    let source = open_source(&cfg.camera)
        .context("open camera source (check camera.source in the config)")?;
    let mut worker = CameraWorker::spawn(source, cfg.camera.target_fps)
        .context("connect camera source")?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::Relaxed);
    })
    .context("install Ctrl-C handler")?;

    log::info!("bottlewatchd running. writing to {}", cfg.db_path);
    log::info!(
        "camera={} {}x{}@{}fps threshold={} cooldown={:?}",
        cfg.camera.source,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.target_fps,
        cfg.detection.confidence_threshold,
        cfg.detection.cooldown
    );

    let stats_interval = Duration::from_secs(args.stats_interval_secs.max(1));
    let mut last_stats_log = Instant::now();
    let mut frames_processed = 0u64;
    let mut event_count = 0u64;
    let idle = Duration::from_millis(5);

    while !stop.load(Ordering::Relaxed) {
        let Some(frame) = worker.latest() else {
            std::thread::sleep(idle);
            continue;
        };

        let (display, outcome) = pipeline.process_frame(&frame);
        frames_processed += 1;

        match outcome {
            Ok(Some(event)) => {
                event_count += 1;
                log::info!(
                    "event #{}: serial={} level={} shape={} conf={:.2} defective={}",
                    event_count,
                    event.serial,
                    event.water_level.as_str(),
                    event.shape_status.as_str(),
                    event.confidence,
                    event.is_defective
                );
            }
            Ok(None) => {
                log::trace!("frame {}: {}", frame.seq, display.caption);
            }
            Err(e) => {
                // Persistence for this pass is lost; detection continues.
                log::error!("frame {}: {e}; continuing without this record", frame.seq);
            }
        }

        if last_stats_log.elapsed() >= stats_interval {
            log_statistics(&pipeline, frames_processed, event_count);
            last_stats_log = Instant::now();
        }
    }

    log::info!("shutdown requested, stopping camera worker");
    worker.stop();
    log_statistics(&pipeline, frames_processed, event_count);
    log::info!("bottlewatchd stopped");
    Ok(())
}

fn log_statistics(pipeline: &DetectionPipeline, frames: u64, events: u64) {
    let today = Utc::now().date_naive();
    match pipeline.statistics(today) {
        Ok(Some(agg)) => log::info!(
            "today: total={} perfect={} defective={} overflow={} low={} (frames={} events={})",
            agg.total,
            agg.perfect,
            agg.defective,
            agg.overflow,
            agg.low,
            frames,
            events
        ),
        Ok(None) => log::info!("today: no detections yet (frames={} events={})", frames, events),
        Err(e) => log::warn!("statistics unavailable: {e}"),
    }
}

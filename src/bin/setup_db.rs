//! setup_db - out-of-band schema provisioning
//!
//! Creates (or verifies) the bottlewatch database schema without starting
//! the daemon. `--sample-data` seeds three bottles so a dashboard has
//! something to show during bring-up.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use bottlewatch::{
    DetectionEvent, EventStore, SerialAllocator, ShapeStatus, SqliteEventStore, WaterLevel,
};

#[derive(Parser, Debug)]
#[command(name = "setup_db", about = "Provision the bottlewatch database schema")]
struct Args {
    /// Database path to provision.
    #[arg(long, env = "BOTTLEWATCH_DB_PATH", default_value = "bottlewatch.db")]
    db_path: String,

    /// Insert three sample bottles for dashboard bring-up.
    #[arg(long)]
    sample_data: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut store =
        SqliteEventStore::open(&args.db_path).context("open and provision database")?;
    log::info!("schema ready in {}", args.db_path);

    if args.sample_data {
        let allocator = SerialAllocator::new();
        let samples = [
            (WaterLevel::Full, ShapeStatus::Perfect, 0.95),
            (WaterLevel::Overflow, ShapeStatus::Perfect, 0.88),
            (WaterLevel::Low, ShapeStatus::Defective, 0.92),
        ];
        let evidence = placeholder_evidence()?;
        for (water, shape, confidence) in samples {
            let event = DetectionEvent::new(
                allocator.allocate(),
                Utc::now(),
                water,
                shape,
                confidence,
                evidence.clone(),
            );
            store.append(&event).context("insert sample bottle")?;
            log::info!(
                "sample bottle {}: {}/{}",
                event.serial,
                water.as_str(),
                shape.as_str()
            );
        }
    }

    Ok(())
}

fn placeholder_evidence() -> Result<Vec<u8>> {
    let image = RgbImage::from_pixel(32, 32, Rgb([128, 128, 128]));
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, 80);
    image
        .write_with_encoder(encoder)
        .context("encode placeholder evidence")?;
    Ok(bytes)
}

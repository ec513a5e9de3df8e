use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "bottlewatch.db";
const DEFAULT_CAMERA_SOURCE: &str = "stub://line_a";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_MIN_BOTTLE_AREA: f64 = 3000.0;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.75;
const DEFAULT_COOLDOWN_SECS: u64 = 3;
const DEFAULT_ROI_PADDING: u32 = 20;
const DEFAULT_MODEL_PATH: &str = "stub:";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 224;

#[derive(Debug, Deserialize, Default)]
struct LineConfigFile {
    db_path: Option<String>,
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    models: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    min_bottle_area: Option<f64>,
    confidence_threshold: Option<f32>,
    cooldown_secs: Option<u64>,
    roi_padding: Option<u32>,
    reset_clears_cooldown: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    water_level: Option<String>,
    shape: Option<String>,
    input_size: Option<u32>,
}

/// Runtime configuration for the line daemon and pipeline.
#[derive(Debug, Clone)]
pub struct LineConfig {
    pub db_path: String,
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub models: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Source URL: `stub://<name>` for the synthetic source, or an HTTP
    /// snapshot endpoint with the `ingest-http` feature.
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// Contours with enclosed area at or below this are noise, not bottles.
    pub min_bottle_area: f64,
    /// Fused confidence must be strictly above this to admit.
    pub confidence_threshold: f32,
    pub cooldown: Duration,
    /// Padding added on all sides of the winning bounding box.
    pub roi_padding: u32,
    /// Whether an operator reset also reopens the cooldown window.
    pub reset_clears_cooldown: bool,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Path to the water-level ONNX model, or `stub:` for the built-in
    /// deterministic classifier.
    pub water_level: String,
    /// Path to the shape ONNX model, or `stub:`.
    pub shape: String,
    /// Square input edge the models expect.
    pub input_size: u32,
}

impl LineConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BOTTLEWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load with an explicit config file, falling back to defaults when
    /// `path` is `None`. Env overrides apply either way.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LineConfigFile) -> Self {
        let camera = CameraSettings {
            source: file
                .camera
                .as_ref()
                .and_then(|c| c.source.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|c| c.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|c| c.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|c| c.target_fps)
                .unwrap_or(DEFAULT_TARGET_FPS),
        };
        let detection = DetectionSettings {
            min_bottle_area: file
                .detection
                .as_ref()
                .and_then(|d| d.min_bottle_area)
                .unwrap_or(DEFAULT_MIN_BOTTLE_AREA),
            confidence_threshold: file
                .detection
                .as_ref()
                .and_then(|d| d.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            cooldown: Duration::from_secs(
                file.detection
                    .as_ref()
                    .and_then(|d| d.cooldown_secs)
                    .unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
            roi_padding: file
                .detection
                .as_ref()
                .and_then(|d| d.roi_padding)
                .unwrap_or(DEFAULT_ROI_PADDING),
            reset_clears_cooldown: file
                .detection
                .as_ref()
                .and_then(|d| d.reset_clears_cooldown)
                .unwrap_or(false),
        };
        let models = ModelSettings {
            water_level: file
                .models
                .as_ref()
                .and_then(|m| m.water_level.clone())
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
            shape: file
                .models
                .as_ref()
                .and_then(|m| m.shape.clone())
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
            input_size: file
                .models
                .and_then(|m| m.input_size)
                .unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
        };
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            camera,
            detection,
            models,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("BOTTLEWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(url) = std::env::var("BOTTLEWATCH_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.source = url;
            }
        }
        if let Ok(threshold) = std::env::var("BOTTLEWATCH_CONFIDENCE_THRESHOLD") {
            let value: f32 = threshold.parse().map_err(|_| {
                anyhow!("BOTTLEWATCH_CONFIDENCE_THRESHOLD must be a number in [0, 1]")
            })?;
            self.detection.confidence_threshold = value;
        }
        if let Ok(secs) = std::env::var("BOTTLEWATCH_COOLDOWN_SECS") {
            let value: u64 = secs
                .parse()
                .map_err(|_| anyhow!("BOTTLEWATCH_COOLDOWN_SECS must be an integer of seconds"))?;
            self.detection.cooldown = Duration::from_secs(value);
        }
        if let Ok(area) = std::env::var("BOTTLEWATCH_MIN_BOTTLE_AREA") {
            let value: f64 = area
                .parse()
                .map_err(|_| anyhow!("BOTTLEWATCH_MIN_BOTTLE_AREA must be a number of pixels"))?;
            self.detection.min_bottle_area = value;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within [0, 1]"));
        }
        if self.detection.min_bottle_area <= 0.0 {
            return Err(anyhow!("min_bottle_area must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be nonzero"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.models.input_size == 0 {
            return Err(anyhow!("model input_size must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self::from_file(LineConfigFile::default())
    }
}

fn read_config_file(path: &Path) -> Result<LineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

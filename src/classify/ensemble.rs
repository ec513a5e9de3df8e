use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::classify::backend::ClassifierBackend;
use crate::classify::backends::StubClassifier;
use crate::classify::result::{Prediction, PredictionSet};
use crate::config::ModelSettings;
use crate::error::PipelineError;
use crate::{ShapeStatus, WaterLevel};

/// Model paths with this prefix select the built-in stub head.
const STUB_MODEL_PREFIX: &str = "stub:";

/// Two independent classifier heads with confidence fusion.
///
/// Both heads are loaded once at construction; a missing asset is a fatal
/// `ModelUnavailable` there, never a per-frame failure.
pub struct ClassifierEnsemble {
    water: Box<dyn ClassifierBackend>,
    shape: Box<dyn ClassifierBackend>,
    input_size: u32,
}

impl ClassifierEnsemble {
    pub fn from_config(models: &ModelSettings) -> Result<Self, PipelineError> {
        let water = load_backend(&models.water_level, models.input_size, WaterLevel::ALL.len())?;
        let shape = load_backend(&models.shape, models.input_size, ShapeStatus::ALL.len())?;
        Ok(Self {
            water,
            shape,
            input_size: models.input_size,
        })
    }

    /// Assemble from pre-built heads; the test seam.
    pub fn with_backends(
        water: Box<dyn ClassifierBackend>,
        shape: Box<dyn ClassifierBackend>,
        input_size: u32,
    ) -> Self {
        Self {
            water,
            shape,
            input_size,
        }
    }

    /// Classify an enhanced region. Scoring failures are reported as
    /// `InvalidImage` and recovered by the pipeline (frame skipped).
    pub fn predict(&mut self, region: &RgbImage) -> Result<PredictionSet, PipelineError> {
        if region.width() == 0 || region.height() == 0 {
            return Err(PipelineError::InvalidImage(
                "cannot classify a zero-size region".to_string(),
            ));
        }

        let resized = imageops::resize(region, self.input_size, self.input_size, FilterType::Triangle);
        let pixels = resized.as_raw();

        let water_scores = self
            .water
            .scores(pixels, self.input_size, self.input_size)
            .map_err(|e| PipelineError::InvalidImage(format!("water-level head: {e}")))?;
        let shape_scores = self
            .shape
            .scores(pixels, self.input_size, self.input_size)
            .map_err(|e| PipelineError::InvalidImage(format!("shape head: {e}")))?;

        let (water_idx, water_conf) = top_score(&water_scores, WaterLevel::ALL.len())
            .map_err(PipelineError::InvalidImage)?;
        let (shape_idx, shape_conf) = top_score(&shape_scores, ShapeStatus::ALL.len())
            .map_err(PipelineError::InvalidImage)?;

        Ok(PredictionSet {
            water_level: Prediction {
                label: WaterLevel::ALL[water_idx],
                confidence: water_conf,
            },
            shape: Prediction {
                label: ShapeStatus::ALL[shape_idx],
                confidence: shape_conf,
            },
            overall_confidence: (water_conf + shape_conf) / 2.0,
        })
    }
}

fn load_backend(
    model_path: &str,
    input_size: u32,
    num_classes: usize,
) -> Result<Box<dyn ClassifierBackend>, PipelineError> {
    if model_path.starts_with(STUB_MODEL_PREFIX) {
        return Ok(Box::new(StubClassifier::new(num_classes)));
    }

    #[cfg(feature = "backend-tract")]
    {
        let backend = crate::classify::backends::TractClassifier::load(
            model_path,
            input_size,
            num_classes,
        )
        .map_err(|e| PipelineError::ModelUnavailable(format!("{model_path}: {e}")))?;
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        let _ = input_size;
        Err(PipelineError::ModelUnavailable(format!(
            "{model_path}: built without the backend-tract feature"
        )))
    }
}

/// First maximal index and its score; errors on arity mismatch.
fn top_score(scores: &[f32], expected: usize) -> Result<(usize, f32), String> {
    if scores.len() != expected {
        return Err(format!(
            "classifier produced {} scores, vocabulary has {}",
            scores.len(),
            expected
        ));
    }
    let mut best = 0usize;
    for (i, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = i;
        }
    }
    Ok((best, scores[best]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use image::Rgb;

    /// Head that always answers with the same scores.
    struct FixedHead(Vec<f32>);

    impl ClassifierBackend for FixedHead {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn scores(&mut self, _pixels: &[u8], _w: u32, _h: u32) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct FailingHead;

    impl ClassifierBackend for FailingHead {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn scores(&mut self, _pixels: &[u8], _w: u32, _h: u32) -> Result<Vec<f32>> {
            Err(anyhow!("inference exploded"))
        }
    }

    fn region() -> RgbImage {
        RgbImage::from_pixel(64, 64, Rgb([120, 130, 140]))
    }

    #[test]
    fn fuses_top_label_confidences_by_mean() {
        let mut ensemble = ClassifierEnsemble::with_backends(
            Box::new(FixedHead(vec![0.05, 0.90, 0.05])),
            Box::new(FixedHead(vec![0.92, 0.08])),
            224,
        );
        let set = ensemble.predict(&region()).unwrap();
        assert_eq!(set.water_level.label, WaterLevel::Full);
        assert_eq!(set.shape.label, ShapeStatus::Perfect);
        assert!((set.overall_confidence - 0.91).abs() < 1e-6);
    }

    #[test]
    fn arity_mismatch_is_an_invalid_image_error() {
        let mut ensemble = ClassifierEnsemble::with_backends(
            Box::new(FixedHead(vec![0.5, 0.5])), // 2 scores for a 3-class head
            Box::new(FixedHead(vec![0.9, 0.1])),
            224,
        );
        let err = ensemble.predict(&region()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    #[test]
    fn backend_failure_is_recovered_as_invalid_image() {
        let mut ensemble = ClassifierEnsemble::with_backends(
            Box::new(FailingHead),
            Box::new(FixedHead(vec![0.9, 0.1])),
            224,
        );
        let err = ensemble.predict(&region()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    #[test]
    fn zero_size_region_is_rejected() {
        let mut ensemble = ClassifierEnsemble::with_backends(
            Box::new(FixedHead(vec![0.1, 0.8, 0.1])),
            Box::new(FixedHead(vec![0.9, 0.1])),
            224,
        );
        let err = ensemble.predict(&RgbImage::new(0, 0)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    #[test]
    fn stub_paths_always_construct() {
        let models = ModelSettings {
            water_level: "stub:".to_string(),
            shape: "stub:".to_string(),
            input_size: 224,
        };
        let mut ensemble = ClassifierEnsemble::from_config(&models).unwrap();
        let set = ensemble.predict(&region()).unwrap();
        assert!(set.overall_confidence > 0.0);
    }
}

#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::classify::backend::ClassifierBackend;

/// ONNX classifier head via tract.
///
/// Loads a local model file and scores RGB regions resized to the model's
/// square input edge. No network I/O, no disk writes after loading.
pub struct TractClassifier {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    input_size: u32,
    num_classes: usize,
}

impl TractClassifier {
    pub fn load<P: AsRef<Path>>(model_path: P, input_size: u32, num_classes: usize) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            num_classes,
        })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != self.input_size || height != self.input_size {
            return Err(anyhow!(
                "region size {}x{} does not match model input {}x{}",
                width,
                height,
                self.input_size,
                self.input_size
            ));
        }
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("region dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        Ok(input.into_tensor())
    }
}

impl ClassifierBackend for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn scores(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<f32>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let scores: Vec<f32> = values.iter().cloned().take(self.num_classes).collect();
        if scores.len() != self.num_classes {
            return Err(anyhow!(
                "model produced {} scores, vocabulary has {}",
                scores.len(),
                self.num_classes
            ));
        }

        // The training head closes with softmax; renormalize to absorb
        // export slack before the ensemble reads the top mass.
        let sum: f32 = scores.iter().sum();
        if sum > 0.0 && sum.is_finite() {
            Ok(scores.into_iter().map(|s| s / sum).collect())
        } else {
            Ok(scores)
        }
    }
}

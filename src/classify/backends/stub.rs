use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::classify::backend::ClassifierBackend;

/// Stub head for tests and `stub:` model paths. Scores are derived from a
/// hash of the pixel buffer, so identical regions always classify the same
/// way and the top label carries enough mass to clear a realistic gate.
pub struct StubClassifier {
    num_classes: usize,
}

impl StubClassifier {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl ClassifierBackend for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn scores(&mut self, pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<f32>> {
        if self.num_classes == 0 {
            return Err(anyhow!("stub classifier needs at least one class"));
        }
        let digest: [u8; 32] = Sha256::digest(pixels).into();

        let winner = digest[0] as usize % self.num_classes;
        let top = 0.80 + (digest[1] as f32 / 255.0) * 0.15;
        let rest = if self.num_classes > 1 {
            (1.0 - top) / (self.num_classes - 1) as f32
        } else {
            0.0
        };

        let mut scores = vec![rest; self.num_classes];
        scores[winner] = if self.num_classes > 1 { top } else { 1.0 };
        Ok(scores)
    }
}

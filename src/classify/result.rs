use serde::{Deserialize, Serialize};

use crate::{ShapeStatus, WaterLevel};

/// One classifier head's verdict: the top label and its probability mass.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prediction<L> {
    pub label: L,
    pub confidence: f32,
}

/// Both heads plus the fused admission score.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictionSet {
    pub water_level: Prediction<WaterLevel>,
    pub shape: Prediction<ShapeStatus>,
    /// Arithmetic mean of the two top-label confidences. Penalizes a pass
    /// only when both heads are uncertain; tolerates asymmetric doubt.
    pub overall_confidence: f32,
}

use anyhow::Result;

/// One classifier head.
///
/// Implementations map a resized, RGB8 region to one score per vocabulary
/// entry, in vocabulary order. Scores are probabilities in [0, 1]; the
/// ensemble takes the top label's mass as the head's confidence.
///
/// Heads are stateless per call: `scores` must not depend on earlier
/// frames, so the ensemble is free to run its two heads concurrently.
pub trait ClassifierBackend: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Score the region. `pixels` is tightly packed RGB, `width * height * 3`
    /// bytes, already resized to the model's input edge.
    fn scores(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<f32>>;
}

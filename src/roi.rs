//! Region-of-interest extraction.
//!
//! Classical edge/contour analysis: cheap enough for real-time use without
//! a learned detector. Assumes a single dominant foreground object on a
//! roughly uniform background; the minimum-area threshold is the sole
//! tunable separating noise from a bottle silhouette.

use image::imageops;
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use imageproc::point::Point;

use crate::frame::{BoundingBox, Region};

// Canny thresholds and blur sigma tuned for 640x480 conveyor footage.
const BLUR_SIGMA: f32 = 1.4;
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
// L-inf radius 4 bridges the same gaps as two passes of a 5x5 kernel.
const DILATE_RADIUS: u8 = 4;

pub struct RegionExtractor {
    min_area: f64,
    padding: u32,
}

impl RegionExtractor {
    pub fn new(min_area: f64, padding: u32) -> Self {
        Self { min_area, padding }
    }

    /// Extract the dominant bottle candidate, or `None` when no contour
    /// clears the area threshold. The input frame is never mutated.
    pub fn extract(&self, frame: &RgbImage) -> Option<Region> {
        if frame.width() == 0 || frame.height() == 0 {
            return None;
        }

        let gray: GrayImage = imageops::grayscale(frame);
        let blurred = gaussian_blur_f32(&gray, BLUR_SIGMA);
        let edges = canny(&blurred, CANNY_LOW, CANNY_HIGH);
        let closed = dilate(&edges, Norm::LInf, DILATE_RADIUS);

        let mut candidates: Vec<(f64, BoundingBox, Vec<Point<i32>>)> =
            find_contours::<i32>(&closed)
                .into_iter()
                .filter(|c| c.border_type == BorderType::Outer)
                .map(|c: Contour<i32>| {
                    let area = contour_area(&c.points);
                    let bbox = BoundingBox::around_points(&c.points);
                    (area, bbox, c.points)
                })
                .collect();

        // Largest area wins; equal areas fall back to leftmost-then-topmost
        // origin so the choice never depends on contour-tracing order.
        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.x.cmp(&b.1.x))
                .then(a.1.y.cmp(&b.1.y))
        });

        for (area, bbox, contour) in candidates {
            if area <= self.min_area {
                // Sorted descending: nothing further can clear the bar.
                break;
            }
            let padded = bbox.padded(self.padding, frame.width(), frame.height());
            if padded.is_empty() {
                continue;
            }
            let image =
                imageops::crop_imm(frame, padded.x, padded.y, padded.w, padded.h).to_image();
            return Some(Region {
                image,
                bbox: padded,
                contour,
            });
        }
        None
    }
}

/// Shoelace area of a closed contour polygon, in square pixels.
fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut doubled = 0i64;
    for i in 0..points.len() {
        let p = points[i];
        let q = points[(i + 1) % points.len()];
        doubled += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (doubled.abs() as f64) / 2.0
}

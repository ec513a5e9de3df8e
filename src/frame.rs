//! Frame and region types.
//!
//! A `Frame` is the pipeline's owned copy of one camera image; the
//! acquisition side keeps its own buffers. A `Region` is the rectangular
//! sub-image believed to contain a bottle, alive for one pipeline pass.

use image::RgbImage;
use imageproc::point::Point;

/// One captured camera image, RGB8.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    /// Monotonic capture sequence number from the source.
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self { image, seq }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Axis-aligned box in frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    /// Tight box around a set of contour points. Empty input yields a
    /// zero-size box at the origin.
    pub fn around_points(points: &[Point<i32>]) -> Self {
        let mut min_x = i32::MAX;
        let mut min_y = i32::MAX;
        let mut max_x = i32::MIN;
        let mut max_y = i32::MIN;
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        if points.is_empty() {
            return Self {
                x: 0,
                y: 0,
                w: 0,
                h: 0,
            };
        }
        let min_x = min_x.max(0) as u32;
        let min_y = min_y.max(0) as u32;
        Self {
            x: min_x,
            y: min_y,
            w: (max_x.max(0) as u32).saturating_sub(min_x) + 1,
            h: (max_y.max(0) as u32).saturating_sub(min_y) + 1,
        }
    }

    /// Expand by `padding` on all sides, clamped to `frame_w` x `frame_h`.
    pub fn padded(&self, padding: u32, frame_w: u32, frame_h: u32) -> Self {
        let x1 = self.x.saturating_sub(padding);
        let y1 = self.y.saturating_sub(padding);
        let x2 = (self.x + self.w + padding).min(frame_w);
        let y2 = (self.y + self.h + padding).min(frame_h);
        Self {
            x: x1,
            y: y1,
            w: x2.saturating_sub(x1),
            h: y2.saturating_sub(y1),
        }
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// Candidate bottle region: sub-image, its box in frame coordinates, and
/// the raw contour kept only for overlay rendering.
#[derive(Clone, Debug)]
pub struct Region {
    pub image: RgbImage,
    pub bbox: BoundingBox,
    pub contour: Vec<Point<i32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_around_points_is_tight() {
        let points = vec![
            Point::new(10, 20),
            Point::new(30, 25),
            Point::new(15, 40),
        ];
        let bbox = BoundingBox::around_points(&points);
        assert_eq!(
            bbox,
            BoundingBox {
                x: 10,
                y: 20,
                w: 21,
                h: 21
            }
        );
    }

    #[test]
    fn padding_clamps_to_frame_bounds() {
        let bbox = BoundingBox {
            x: 5,
            y: 5,
            w: 100,
            h: 100,
        };
        let padded = bbox.padded(20, 120, 110);
        assert_eq!(padded.x, 0);
        assert_eq!(padded.y, 0);
        assert_eq!(padded.w, 120);
        assert_eq!(padded.h, 110);
    }

    #[test]
    fn empty_points_produce_empty_bbox() {
        let bbox = BoundingBox::around_points(&[]);
        assert!(bbox.is_empty());
    }
}

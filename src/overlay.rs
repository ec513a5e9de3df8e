//! Display-frame annotations.
//!
//! Drawing happens on a caller-supplied display copy, never on the frame
//! the classifiers saw. The caption carries the text a presentation layer
//! renders next to the box; the presentation layer never constructs events.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::classify::PredictionSet;
use crate::frame::BoundingBox;
use crate::is_defective;

pub const COLOR_PERFECT: Rgb<u8> = Rgb([0, 255, 0]);
pub const COLOR_DEFECTIVE: Rgb<u8> = Rgb([255, 0, 0]);
pub const COLOR_SCANNING: Rgb<u8> = Rgb([255, 255, 0]);
pub const COLOR_CONTOUR: Rgb<u8> = Rgb([255, 255, 0]);

const BOX_THICKNESS: i32 = 3;
const BANNER_HEIGHT: u32 = 24;
const SCANNING_BORDER: u32 = 4;

/// Annotated frame handed to the presentation layer.
#[derive(Clone, Debug)]
pub struct DisplayFrame {
    pub image: RgbImage,
    /// Human-readable status line: scanning notice, or serial/labels/
    /// confidence for a found region.
    pub caption: String,
}

/// Box color for a classified candidate.
pub fn status_color(predictions: &PredictionSet) -> Rgb<u8> {
    if is_defective(predictions.water_level.label, predictions.shape.label) {
        COLOR_DEFECTIVE
    } else {
        COLOR_PERFECT
    }
}

/// Border indicator shown while no bottle is in frame.
pub fn draw_scanning(image: &mut RgbImage) {
    let (w, h) = image.dimensions();
    if w <= 2 * SCANNING_BORDER || h <= 2 * SCANNING_BORDER {
        return;
    }
    for i in 0..SCANNING_BORDER as i32 {
        draw_hollow_rect_mut(
            image,
            Rect::at(i, i).of_size(w - 2 * i as u32, h - 2 * i as u32),
            COLOR_SCANNING,
        );
    }
}

/// Box, banner, and contour for a found region, admitted or not.
pub fn draw_candidate(
    image: &mut RgbImage,
    bbox: &BoundingBox,
    contour: &[Point<i32>],
    predictions: &PredictionSet,
) {
    let color = status_color(predictions);

    for i in 0..BOX_THICKNESS {
        let shrink = 2 * i as u32;
        if bbox.w <= shrink || bbox.h <= shrink {
            break;
        }
        draw_hollow_rect_mut(
            image,
            Rect::at(bbox.x as i32 + i, bbox.y as i32 + i).of_size(bbox.w - shrink, bbox.h - shrink),
            color,
        );
    }

    // Banner strip above the box; inside the box top when there is no room.
    let banner_y = if bbox.y >= BANNER_HEIGHT {
        bbox.y - BANNER_HEIGHT
    } else {
        bbox.y
    };
    draw_filled_rect_mut(
        image,
        Rect::at(bbox.x as i32, banner_y as i32).of_size(bbox.w.max(1), BANNER_HEIGHT),
        color,
    );

    for p in contour {
        if p.x >= 0 && p.y >= 0 && (p.x as u32) < image.width() && (p.y as u32) < image.height() {
            image.put_pixel(p.x as u32, p.y as u32, COLOR_CONTOUR);
        }
    }
}

/// Caption for a classified candidate. Serial present only on admission.
pub fn candidate_caption(predictions: &PredictionSet, serial: Option<&str>) -> String {
    let status = if is_defective(predictions.water_level.label, predictions.shape.label) {
        "DEFECTIVE"
    } else {
        "PERFECT"
    };
    match serial {
        Some(serial) => format!(
            "Serial: {} | Level: {} | Shape: {} | Conf: {:.2} | {}",
            serial,
            predictions.water_level.label.as_str(),
            predictions.shape.label.as_str(),
            predictions.overall_confidence,
            status
        ),
        None => format!(
            "Level: {} | Shape: {} | Conf: {:.2} | {}",
            predictions.water_level.label.as_str(),
            predictions.shape.label.as_str(),
            predictions.overall_confidence,
            status
        ),
    }
}

pub const SCANNING_CAPTION: &str = "Scanning for bottle...";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Prediction;
    use crate::{ShapeStatus, WaterLevel};

    fn predictions(water: WaterLevel, shape: ShapeStatus) -> PredictionSet {
        PredictionSet {
            water_level: Prediction {
                label: water,
                confidence: 0.9,
            },
            shape: Prediction {
                label: shape,
                confidence: 0.92,
            },
            overall_confidence: 0.91,
        }
    }

    #[test]
    fn status_color_follows_defect_derivation() {
        assert_eq!(
            status_color(&predictions(WaterLevel::Full, ShapeStatus::Perfect)),
            COLOR_PERFECT
        );
        assert_eq!(
            status_color(&predictions(WaterLevel::Overflow, ShapeStatus::Perfect)),
            COLOR_DEFECTIVE
        );
    }

    #[test]
    fn scanning_overlay_touches_the_border() {
        let mut img = RgbImage::from_pixel(64, 48, Rgb([0, 0, 0]));
        draw_scanning(&mut img);
        assert_eq!(*img.get_pixel(0, 0), COLOR_SCANNING);
        assert_eq!(*img.get_pixel(63, 47), COLOR_SCANNING);
    }

    #[test]
    fn candidate_overlay_draws_the_box() {
        let mut img = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let bbox = BoundingBox {
            x: 30,
            y: 40,
            w: 40,
            h: 30,
        };
        draw_candidate(
            &mut img,
            &bbox,
            &[],
            &predictions(WaterLevel::Full, ShapeStatus::Perfect),
        );
        assert_eq!(*img.get_pixel(30, 40), COLOR_PERFECT);
        // Banner sits directly above the box.
        assert_eq!(*img.get_pixel(30, 40 - BANNER_HEIGHT), COLOR_PERFECT);
    }

    #[test]
    fn captions_name_serial_only_when_admitted() {
        let preds = predictions(WaterLevel::Full, ShapeStatus::Perfect);
        let with = candidate_caption(&preds, Some("BTL-20250101120000-ABC123"));
        assert!(with.contains("BTL-20250101120000-ABC123"));
        assert!(with.contains("PERFECT"));
        let without = candidate_caption(&preds, None);
        assert!(!without.contains("Serial"));
    }
}

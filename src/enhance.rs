//! Region enhancement.
//!
//! Contrast-limited adaptive histogram equalization (CLAHE) applied to the
//! luma plane only: evens out conveyor lighting without touching the color
//! cues the shape classifier relies on. `imageproc` ships global histogram
//! equalization only, so the clip-limited tiled variant lives here on the
//! same histogram/CDF machinery.

use image::{Rgb, RgbImage};

use crate::error::PipelineError;

const LUMA_BINS: usize = 256;

pub struct ImageEnhancer {
    clip_limit: f32,
    tile_grid: u32,
}

impl ImageEnhancer {
    pub fn new(clip_limit: f32, tile_grid: u32) -> Self {
        Self {
            clip_limit,
            tile_grid: tile_grid.max(1),
        }
    }

    /// Remap luma with CLAHE; chroma passes through. Output has the input's
    /// dimensions. Zero-size input is an `InvalidImage` error.
    pub fn enhance(&self, region: &RgbImage) -> Result<RgbImage, PipelineError> {
        let (w, h) = region.dimensions();
        if w == 0 || h == 0 {
            return Err(PipelineError::InvalidImage(
                "cannot enhance a zero-size region".to_string(),
            ));
        }

        // Split into luma + chroma planes (BT.601 full range).
        let mut luma = vec![0u8; (w * h) as usize];
        let mut cb = vec![0f32; (w * h) as usize];
        let mut cr = vec![0f32; (w * h) as usize];
        for (i, Rgb([r, g, b])) in region.pixels().enumerate() {
            let (r, g, b) = (*r as f32, *g as f32, *b as f32);
            let y = 0.299 * r + 0.587 * g + 0.114 * b;
            luma[i] = y.round().clamp(0.0, 255.0) as u8;
            cb[i] = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
            cr[i] = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
        }

        let equalized = self.equalize_luma(&luma, w, h);

        let mut out = RgbImage::new(w, h);
        for (i, pixel) in out.pixels_mut().enumerate() {
            let y = equalized[i] as f32;
            let r = y + 1.402 * (cr[i] - 128.0);
            let g = y - 0.344_136 * (cb[i] - 128.0) - 0.714_136 * (cr[i] - 128.0);
            let b = y + 1.772 * (cb[i] - 128.0);
            *pixel = Rgb([
                r.round().clamp(0.0, 255.0) as u8,
                g.round().clamp(0.0, 255.0) as u8,
                b.round().clamp(0.0, 255.0) as u8,
            ]);
        }
        Ok(out)
    }

    /// Per-tile clipped equalization with bilinear blending between the
    /// four surrounding tile mappings.
    fn equalize_luma(&self, luma: &[u8], w: u32, h: u32) -> Vec<u8> {
        let grid = self.tile_grid as usize;
        let tile_w = (w as usize).div_ceil(grid).max(1);
        let tile_h = (h as usize).div_ceil(grid).max(1);
        let tiles_x = (w as usize).div_ceil(tile_w);
        let tiles_y = (h as usize).div_ceil(tile_h);

        let mut luts: Vec<[u8; LUMA_BINS]> = Vec::with_capacity(tiles_x * tiles_y);
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let x0 = tx * tile_w;
                let y0 = ty * tile_h;
                let x1 = (x0 + tile_w).min(w as usize);
                let y1 = (y0 + tile_h).min(h as usize);
                luts.push(self.tile_lut(luma, w as usize, x0, y0, x1, y1));
            }
        }

        let mut out = vec![0u8; luma.len()];
        for y in 0..h as usize {
            // Tile-space coordinate of this row relative to tile centers.
            let tyf = (y as f32 + 0.5) / tile_h as f32 - 0.5;
            let ty0 = (tyf.floor() as i64).clamp(0, tiles_y as i64 - 1) as usize;
            let ty1 = (tyf.floor() as i64 + 1).clamp(0, tiles_y as i64 - 1) as usize;
            let fy = tyf - tyf.floor();
            for x in 0..w as usize {
                let txf = (x as f32 + 0.5) / tile_w as f32 - 0.5;
                let tx0 = (txf.floor() as i64).clamp(0, tiles_x as i64 - 1) as usize;
                let tx1 = (txf.floor() as i64 + 1).clamp(0, tiles_x as i64 - 1) as usize;
                let fx = txf - txf.floor();

                let v = luma[y * w as usize + x] as usize;
                let top = (1.0 - fx) * luts[ty0 * tiles_x + tx0][v] as f32
                    + fx * luts[ty0 * tiles_x + tx1][v] as f32;
                let bottom = (1.0 - fx) * luts[ty1 * tiles_x + tx0][v] as f32
                    + fx * luts[ty1 * tiles_x + tx1][v] as f32;
                let blended = (1.0 - fy) * top + fy * bottom;
                out[y * w as usize + x] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
        out
    }

    fn tile_lut(
        &self,
        luma: &[u8],
        stride: usize,
        x0: usize,
        y0: usize,
        x1: usize,
        y1: usize,
    ) -> [u8; LUMA_BINS] {
        let mut hist = [0u32; LUMA_BINS];
        for y in y0..y1 {
            for x in x0..x1 {
                hist[luma[y * stride + x] as usize] += 1;
            }
        }
        let pixels = ((x1 - x0) * (y1 - y0)) as u32;
        if pixels == 0 {
            let mut identity = [0u8; LUMA_BINS];
            for (v, slot) in identity.iter_mut().enumerate() {
                *slot = v as u8;
            }
            return identity;
        }

        // Clip the histogram and hand the excess back evenly.
        let clip = ((self.clip_limit * pixels as f32) / LUMA_BINS as f32).max(1.0) as u32;
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > clip {
                excess += *bin - clip;
                *bin = clip;
            }
        }
        let bump = excess / LUMA_BINS as u32;
        let remainder = (excess % LUMA_BINS as u32) as usize;
        for (v, bin) in hist.iter_mut().enumerate() {
            *bin += bump + u32::from(v < remainder);
        }

        let mut lut = [0u8; LUMA_BINS];
        let mut cdf = 0u64;
        for (v, slot) in lut.iter_mut().enumerate() {
            cdf += hist[v] as u64;
            *slot = ((cdf * 255) / pixels as u64).min(255) as u8;
        }
        lut
    }
}

impl Default for ImageEnhancer {
    /// Clip limit 3.0 over an 8x8 tile grid.
    fn default() -> Self {
        Self::new(3.0, 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_preserves_dimensions() {
        let img = RgbImage::from_pixel(123, 77, Rgb([90, 120, 60]));
        let enhanced = ImageEnhancer::default().enhance(&img).unwrap();
        assert_eq!(enhanced.dimensions(), (123, 77));
    }

    #[test]
    fn zero_size_region_is_rejected() {
        let img = RgbImage::new(0, 0);
        let err = ImageEnhancer::default().enhance(&img).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    #[test]
    fn bimodal_image_is_stretched_toward_full_range() {
        // Half at 100, half at 140; a single unclipped tile makes this plain
        // histogram equalization, which must push the modes far apart.
        let mut img = RgbImage::new(64, 64);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            let v = if x < 32 { 100 } else { 140 };
            *pixel = Rgb([v, v, v]);
        }
        let enhancer = ImageEnhancer::new(200.0, 1);
        let enhanced = enhancer.enhance(&img).unwrap();

        let lumas: Vec<u8> = enhanced.pixels().map(|p| p.0[0]).collect();
        let min = *lumas.iter().min().unwrap();
        let max = *lumas.iter().max().unwrap();
        assert!(
            max - min > 100,
            "expected a strong stretch, got range {}..{}",
            min,
            max
        );
    }

    #[test]
    fn tight_clip_limit_approximates_identity() {
        let img = RgbImage::from_pixel(64, 64, Rgb([128, 128, 128]));
        let enhancer = ImageEnhancer::new(1.0, 4);
        let enhanced = enhancer.enhance(&img).unwrap();
        for pixel in enhanced.pixels() {
            let v = pixel.0[0] as i32;
            assert!((v - 128).abs() <= 3, "expected ~128, got {}", v);
        }
    }

    #[test]
    fn grayscale_input_stays_neutral() {
        let mut img = RgbImage::new(32, 32);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let v = ((x * 7 + y * 5) % 200 + 20) as u8;
            *pixel = Rgb([v, v, v]);
        }
        let enhanced = ImageEnhancer::default().enhance(&img).unwrap();
        for Rgb([r, g, b]) in enhanced.pixels() {
            assert_eq!(r, g);
            assert_eq!(g, b);
        }
    }
}

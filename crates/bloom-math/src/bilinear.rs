//! Bilinear resampling weights.
//!
//! Sample positions are in continuous pixel coordinates with pixel centers
//! at `(x + 0.5, y + 0.5)`. [`Bilinear::at`] yields the four neighboring
//! texel coordinates and their blend weights; callers bounds-check each
//! tap, so samples near the border fade to black instead of clamping.

/// The four taps and weights of one bilinear sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bilinear {
    /// Tap coordinates: top-left, top-right, bottom-left, bottom-right.
    /// May be negative or out of range; callers must bounds-check.
    pub taps: [(i64, i64); 4],
    /// Blend weight per tap, summing to 1.
    pub weights: [f32; 4],
}

impl Bilinear {
    /// Computes taps and weights for a sample at `(px, py)`.
    pub fn at(px: f32, py: f32) -> Self {
        let tlx = (px - 0.5).floor() as i64;
        let tly = (py - 0.5).floor() as i64;

        let along_x = px - (tlx as f32 + 0.5);
        let along_y = py - (tly as f32 + 0.5);

        Self {
            taps: [
                (tlx, tly),
                (tlx + 1, tly),
                (tlx, tly + 1),
                (tlx + 1, tly + 1),
            ],
            weights: [
                (1.0 - along_x) * (1.0 - along_y),
                along_x * (1.0 - along_y),
                (1.0 - along_x) * along_y,
                along_x * along_y,
            ],
        }
    }

    /// Samples the RGB channels of a flat RGBA buffer at `(px, py)`.
    ///
    /// Out-of-range taps contribute zero.
    pub fn sample_rgb(buffer: &[f32], width: u32, height: u32, px: f32, py: f32) -> [f32; 3] {
        let bil = Self::at(px, py);
        let mut out = [0.0f32; 3];
        for (tap, w) in bil.taps.iter().zip(bil.weights.iter()) {
            if *w == 0.0 {
                continue;
            }
            let (tx, ty) = *tap;
            if crate::in_bounds(tx, ty, width, height) {
                let idx = (ty as usize * width as usize + tx as usize) * 4;
                out[0] += buffer[idx] * w;
                out[1] += buffer[idx + 1] * w;
                out[2] += buffer[idx + 2] * w;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_weights_sum_to_one() {
        let bil = Bilinear::at(3.3, 7.8);
        let sum: f32 = bil.weights.iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pixel_center_is_exact() {
        // Sampling exactly at a pixel center puts all weight on one tap.
        let bil = Bilinear::at(2.5, 4.5);
        assert_eq!(bil.taps[0], (2, 4));
        assert_relative_eq!(bil.weights[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sample_rgb_interpolates() {
        // 2x1 buffer: black then white.
        let buf = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let mid = Bilinear::sample_rgb(&buf, 2, 1, 1.0, 0.5);
        assert_relative_eq!(mid[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_out_of_range_taps_fade_to_black() {
        let buf = vec![1.0, 1.0, 1.0, 1.0];
        // Halfway off the left edge of a 1x1 buffer.
        let edge = Bilinear::sample_rgb(&buf, 1, 1, 0.0, 0.5);
        assert_relative_eq!(edge[0], 0.5, epsilon = 1e-6);
    }
}

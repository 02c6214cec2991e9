//! 2-D FFT helpers built on `rustfft`.
//!
//! Used by the FFT convolution backend and the diffraction pattern pass.
//! Transforms are row-column decompositions over a flat row-major
//! `Complex<f32>` buffer. Forward and inverse are both unnormalized;
//! callers apply `1 / (w * h)` once after an inverse when they need a true
//! round trip.

use num_complex::Complex;
use rustfft::FftPlanner;

/// Convolution padding block size. Padded dimensions are rounded up to a
/// multiple of this. Empirical, tunable; the only hard requirement is that
/// no kernel energy wraps around the padded boundary.
pub const PAD_BLOCK: u32 = 32;

/// Computes the padded dimensions for a non-wrapping linear convolution.
///
/// The kernel's declared center `(center_x, center_y)` (normalized to
/// `[0, 1]`) shifts where energy lands, so padding grows by the center's
/// offset from the geometric middle, then rounds up to [`PAD_BLOCK`].
pub fn conv_padding(
    input_w: u32,
    input_h: u32,
    kernel_w: u32,
    kernel_h: u32,
    center_x: f32,
    center_y: f32,
) -> (u32, u32) {
    let extra_x =
        ((kernel_w as f32 / 2.0).floor() - (center_x * kernel_w as f32).floor()).abs() as u32 + 1;
    let extra_y =
        ((kernel_h as f32 / 2.0).floor() - (center_y * kernel_h as f32).floor()).abs() as u32 + 1;

    let total_w = input_w + kernel_w + extra_x;
    let total_h = input_h + kernel_h + extra_y;

    (
        total_w + PAD_BLOCK - (total_w % PAD_BLOCK),
        total_h + PAD_BLOCK - (total_h % PAD_BLOCK),
    )
}

/// Wraps `i + shift` around `size`, for quadrant shifting.
#[inline]
pub fn shift_index(i: usize, shift: usize, size: usize) -> usize {
    (i + shift) % size
}

/// Planner-backed 2-D FFT over row-major complex buffers.
pub struct Fft2d {
    planner: FftPlanner<f32>,
}

impl Fft2d {
    /// Creates a new planner. Plans are cached per length, so one instance
    /// can serve all channels of a convolution.
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// In-place forward 2-D transform of a `width` x `height` buffer.
    pub fn forward(&mut self, data: &mut [Complex<f32>], width: usize, height: usize) {
        self.transform(data, width, height, true);
    }

    /// In-place inverse 2-D transform. Unnormalized; scale by
    /// `1 / (width * height)` for a round trip.
    pub fn inverse(&mut self, data: &mut [Complex<f32>], width: usize, height: usize) {
        self.transform(data, width, height, false);
    }

    fn transform(&mut self, data: &mut [Complex<f32>], width: usize, height: usize, fwd: bool) {
        debug_assert_eq!(data.len(), width * height);

        let row_fft = if fwd {
            self.planner.plan_fft_forward(width)
        } else {
            self.planner.plan_fft_inverse(width)
        };
        for row in data.chunks_exact_mut(width) {
            row_fft.process(row);
        }

        let col_fft = if fwd {
            self.planner.plan_fft_forward(height)
        } else {
            self.planner.plan_fft_inverse(height)
        };
        let mut col_buf = vec![Complex::new(0.0f32, 0.0); height];
        for x in 0..width {
            for y in 0..height {
                col_buf[y] = data[y * width + x];
            }
            col_fft.process(&mut col_buf);
            for y in 0..height {
                data[y * width + x] = col_buf[y];
            }
        }
    }
}

impl Default for Fft2d {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_no_wraparound() {
        let (pw, ph) = conv_padding(100, 80, 31, 31, 0.5, 0.5);
        assert!(pw >= 100 + 31);
        assert!(ph >= 80 + 31);
        assert_eq!(pw % PAD_BLOCK, 0);
        assert_eq!(ph % PAD_BLOCK, 0);
    }

    #[test]
    fn test_padding_grows_with_off_center_kernel() {
        let centered = conv_padding(100, 100, 64, 64, 0.5, 0.5);
        let cornered = conv_padding(100, 100, 64, 64, 0.0, 0.0);
        assert!(cornered.0 >= centered.0);
        assert!(cornered.1 >= centered.1);
    }

    #[test]
    fn test_forward_inverse_round_trip() {
        let (w, h) = (16, 8);
        let mut data: Vec<Complex<f32>> = (0..w * h)
            .map(|i| Complex::new((i % 7) as f32 * 0.25, 0.0))
            .collect();
        let original = data.clone();

        let mut fft = Fft2d::new();
        fft.forward(&mut data, w, h);
        fft.inverse(&mut data, w, h);

        let scale = 1.0 / (w * h) as f32;
        for (a, b) in data.iter().zip(original.iter()) {
            assert!((a.re * scale - b.re).abs() < 1e-4);
        }
    }

    #[test]
    fn test_shift_index_wraps() {
        assert_eq!(shift_index(3, 2, 4), 1);
        assert_eq!(shift_index(0, 2, 4), 2);
    }
}

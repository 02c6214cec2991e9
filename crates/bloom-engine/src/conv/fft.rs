//! Frequency-domain convolution backend.
//!
//! Per channel: the thresholded input goes into the middle of a padded
//! complex buffer, the kernel is wrapped around the origin so its declared
//! center acts as the splat origin, both are transformed, combined
//! pointwise, and inverse-transformed. Wrapping the kernel at placement
//! time keeps the inverse aligned with the input window, so the final crop
//! is a straight copy. Padding is sized so no kernel energy wraps across
//! the input region.
//!
//! Progress is a fixed ladder of 14 labeled stages; cancellation is
//! checked at each stage boundary.

use super::{center_texel, threshold_mul, ConvContext, ConvolveBackend};
use crate::params::CONV_MULTIPLIER;
use crate::state::{Progress, RunState};
use bloom_core::{PixelBuffer, Result};
use bloom_math::fft::{conv_padding, shift_index, Fft2d};
use bloom_math::{grayscale_rgb, transform_knee, GrayscaleMode, EPSILON};
use num_complex::Complex;
use tracing::trace;

const STAGES: u32 = 14;

const CHANNEL_STAGES: [[&str; 4]; 3] = [
    ["forward input R", "forward kernel R", "combine R", "inverse R"],
    ["forward input G", "forward kernel G", "combine G", "inverse G"],
    ["forward input B", "forward kernel B", "combine B", "inverse B"],
];

/// FFT convolution backend.
#[derive(Default)]
pub struct FftBackend;

struct StageLadder<'a> {
    state: &'a RunState,
    index: u32,
}

impl StageLadder<'_> {
    fn advance(&mut self, label: &'static str) -> Result<()> {
        self.state.check_canceled()?;
        self.index += 1;
        trace!(stage = self.index, label, "fft stage");
        self.state.set_progress(Progress::Stage {
            index: self.index,
            total: STAGES,
            label,
        });
        Ok(())
    }
}

impl ConvolveBackend for FftBackend {
    fn run(&mut self, ctx: &ConvContext<'_>) -> Result<PixelBuffer> {
        let input = ctx.input;
        let kernel = ctx.kernel;
        let (iw, ih) = input.dimensions();
        let (kw, kh) = kernel.dimensions();
        let [ncx, ncy] = ctx.params.kernel.center;

        let mut stages = StageLadder {
            state: ctx.state,
            index: 0,
        };
        stages.advance("preparing buffers")?;

        let (pw, ph) = conv_padding(iw, ih, kw, kh, ncx, ncy);
        let (pw_us, ph_us) = (pw as usize, ph as usize);
        let len = pw_us * ph_us;

        // Input window placement inside the padded buffer.
        let ox = ((pw - iw) / 2) as usize;
        let oy = ((ph - ih) / 2) as usize;
        let (kcx, kcy) = center_texel((kw, kh), [ncx, ncy]);

        let threshold = ctx.params.threshold;
        let knee_width = transform_knee(ctx.params.knee);
        let scale = CONV_MULTIPLIER / len as f32;

        let mut fft = Fft2d::new();
        let mut out = PixelBuffer::new(iw, ih);

        for ch in 0..3usize {
            let labels = CHANNEL_STAGES[ch];

            stages.advance(labels[0])?;
            let mut signal = vec![Complex::new(0.0f32, 0.0); len];
            for y in 0..ih {
                for x in 0..iw {
                    let idx = input.offset(x, y);
                    let px = &input.data()[idx..idx + 3];
                    let gray = grayscale_rgb(px[0], px[1], px[2], GrayscaleMode::Luminance);
                    let mul = threshold_mul(gray, threshold, knee_width);
                    if mul > 0.0 {
                        signal[(oy + y as usize) * pw_us + ox + x as usize] =
                            Complex::new(px[ch] * mul, 0.0);
                    }
                }
            }
            fft.forward(&mut signal, pw_us, ph_us);

            stages.advance(labels[1])?;
            let mut response = vec![Complex::new(0.0f32, 0.0); len];
            for y in 0..kh {
                for x in 0..kw {
                    // Wrap the kernel around the origin, anchored at its
                    // declared center texel.
                    let px = shift_index(x as usize, pw_us - kcx as usize, pw_us);
                    let py = shift_index(y as usize, ph_us - kcy as usize, ph_us);
                    response[py * pw_us + px] =
                        Complex::new(kernel.data()[kernel.offset(x, y) + ch], 0.0);
                }
            }
            fft.forward(&mut response, pw_us, ph_us);

            stages.advance(labels[2])?;
            if ctx.params.deconvolve {
                for (a, b) in signal.iter_mut().zip(response.iter()) {
                    *a = if b.norm_sqr() > EPSILON {
                        *a / b
                    } else {
                        Complex::new(0.0, 0.0)
                    };
                }
            } else {
                for (a, b) in signal.iter_mut().zip(response.iter()) {
                    *a *= b;
                }
            }

            stages.advance(labels[3])?;
            fft.inverse(&mut signal, pw_us, ph_us);
            for y in 0..ih {
                for x in 0..iw {
                    let v = signal[(oy + y as usize) * pw_us + ox + x as usize].re * scale;
                    let idx = out.offset(x, y) + ch;
                    out.data_mut()[idx] = v.max(0.0);
                }
            }
        }

        stages.advance("assembling output")?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ConvolutionParams;
    use bloom_core::SharedImage;

    fn run_fft(
        input: &PixelBuffer,
        kernel: &PixelBuffer,
        params: &ConvolutionParams,
    ) -> PixelBuffer {
        let state = RunState::new();
        state.begin();
        let preview = SharedImage::default();
        let ctx = ConvContext {
            state: &state,
            preview: &preview,
            params,
            input,
            kernel,
        };
        FftBackend.run(&ctx).unwrap()
    }

    #[test]
    fn test_impulse_spreads_kernel_shape() {
        // A single bright pixel convolved with a uniform kernel paints a
        // kernel-sized patch around itself.
        let mut input = PixelBuffer::new(32, 32);
        let idx = input.offset(16, 16);
        input.data_mut()[idx..idx + 3].copy_from_slice(&[1024.0, 1024.0, 1024.0]);

        let mut kernel = PixelBuffer::new(5, 5);
        kernel.fill([1.0, 1.0, 1.0, 1.0]);

        let params = ConvolutionParams::default();
        let out = run_fft(&input, &kernel, &params);

        // With CONV_MULTIPLIER = 1/1024, each painted texel is about 1.
        let center = out.offset(16, 16);
        assert!((out.data()[center] - 1.0).abs() < 0.05);
        let near = out.offset(14, 14);
        assert!((out.data()[near] - 1.0).abs() < 0.05);
        let far = out.offset(5, 5);
        assert!(out.data()[far].abs() < 0.05);
    }

    #[test]
    fn test_threshold_suppresses_dim_pixels() {
        let mut input = PixelBuffer::new(16, 16);
        input.fill([0.1, 0.1, 0.1, 1.0]);
        let idx = input.offset(8, 8);
        input.data_mut()[idx..idx + 3].copy_from_slice(&[1024.0, 1024.0, 1024.0]);

        let kernel = {
            let mut k = PixelBuffer::new(1, 1);
            k.fill([1.0, 1.0, 1.0, 1.0]);
            k
        };

        let params = ConvolutionParams {
            threshold: 1.0,
            ..Default::default()
        };
        let out = run_fft(&input, &kernel, &params);

        // Only the bright pixel passed the threshold.
        let bright = out.offset(8, 8);
        assert!(out.data()[bright] > 0.5);
        let dim = out.offset(0, 0);
        assert!(out.data()[dim] < 1e-3);
    }

    #[test]
    fn test_cancel_aborts_at_stage_boundary() {
        let input = PixelBuffer::new(16, 16);
        let kernel = PixelBuffer::new(3, 3);
        let params = ConvolutionParams::default();

        let state = RunState::new();
        state.begin();
        state.request_cancel();
        let preview = SharedImage::default();
        let ctx = ConvContext {
            state: &state,
            preview: &preview,
            params: &params,
            input: &input,
            kernel: &kernel,
        };
        let err = FftBackend.run(&ctx).unwrap_err();
        assert!(err.is_canceled());
    }
}

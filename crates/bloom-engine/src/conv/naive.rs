//! Direct splatting convolution on CPU threads.
//!
//! Input pixel `i` belongs to thread `i % N`. Each thread splats its
//! pixels' kernel contributions into a private full-size accumulator
//! guarded by a mutex it holds only for the duration of one pixel, so the
//! coordinating thread can sum the partials into a progress preview about
//! once per second without ever observing a torn splat. Threads poll the
//! shared cancel flag per pixel and bail out cooperatively.

use super::{center_texel, threshold_mul, ConvContext, ConvolveBackend};
use crate::params::CONV_MULTIPLIER;
use crate::state::Progress;
use bloom_core::{PixelBuffer, Result};
use bloom_math::{grayscale_rgb, in_bounds, transform_knee, GrayscaleMode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// How often partial accumulators are summed into the shared preview.
const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(1000);

/// Coordinator poll interval.
const TICK: Duration = Duration::from_millis(33);

/// Borrowed view of a flat RGBA raster, for splatting helpers shared with
/// the worker executable.
#[derive(Debug, Clone, Copy)]
pub struct RasterView<'a> {
    /// Raster width in pixels.
    pub width: u32,
    /// Raster height in pixels.
    pub height: u32,
    /// Flat RGBA data, `width * height * 4` floats.
    pub data: &'a [f32],
}

impl<'a> From<&'a PixelBuffer> for RasterView<'a> {
    fn from(buf: &'a PixelBuffer) -> Self {
        Self {
            width: buf.width(),
            height: buf.height(),
            data: buf.data(),
        }
    }
}

/// Splats one input pixel's kernel contribution into `acc`.
///
/// `acc` is an input-sized flat RGBA accumulator. The kernel is stamped
/// around input pixel `index` with its `center` texel as the anchor; taps
/// falling outside the raster are dropped. A pixel whose luminance falls
/// below `threshold` contributes nothing.
pub fn splat_pixel(
    acc: &mut [f32],
    input: &RasterView<'_>,
    kernel: &RasterView<'_>,
    center: (u32, u32),
    threshold: f32,
    knee_width: f32,
    index: usize,
) {
    let w = input.width as usize;
    let x = (index % w) as i64;
    let y = (index / w) as i64;

    let base = index * 4;
    let r = input.data[base];
    let g = input.data[base + 1];
    let b = input.data[base + 2];

    let gray = grayscale_rgb(r, g, b, GrayscaleMode::Luminance);
    let mul = threshold_mul(gray, threshold, knee_width);
    if mul <= 0.0 {
        return;
    }
    let (sr, sg, sb) = (r * mul, g * mul, b * mul);
    if sr == 0.0 && sg == 0.0 && sb == 0.0 {
        return;
    }

    for ky in 0..kernel.height as i64 {
        let oy = y + ky - center.1 as i64;
        if oy < 0 || oy >= input.height as i64 {
            continue;
        }
        for kx in 0..kernel.width as i64 {
            let ox = x + kx - center.0 as i64;
            if !in_bounds(ox, oy, input.width, input.height) {
                continue;
            }
            let kidx = (ky as usize * kernel.width as usize + kx as usize) * 4;
            let oidx = (oy as usize * w + ox as usize) * 4;
            acc[oidx] += kernel.data[kidx] * sr;
            acc[oidx + 1] += kernel.data[kidx + 1] * sg;
            acc[oidx + 2] += kernel.data[kidx + 2] * sb;
        }
    }
}

/// Naive CPU convolution backend.
pub struct NaiveCpuBackend;

impl ConvolveBackend for NaiveCpuBackend {
    fn run(&mut self, ctx: &ConvContext<'_>) -> Result<PixelBuffer> {
        let threads = ctx.params.threads.max(1) as usize;
        let (iw, ih) = ctx.input.dimensions();
        let total = iw as u64 * ih as u64;
        let len = total as usize * 4;

        let input = RasterView::from(ctx.input);
        let kernel = RasterView::from(ctx.kernel);
        let center = center_texel(ctx.kernel.dimensions(), ctx.params.kernel.center);
        let threshold = ctx.params.threshold;
        let knee_width = transform_knee(ctx.params.knee);

        debug!(threads, total, "naive cpu convolution");

        let done = AtomicU64::new(0);
        let partials: Vec<Mutex<Vec<f32>>> =
            (0..threads).map(|_| Mutex::new(vec![0.0f32; len])).collect();

        std::thread::scope(|scope| {
            for (tid, partial) in partials.iter().enumerate() {
                let done = &done;
                let state = ctx.state;
                let input = &input;
                let kernel = &kernel;
                scope.spawn(move || {
                    for index in (tid..total as usize).step_by(threads) {
                        if state.cancel_requested() {
                            return;
                        }
                        {
                            let mut acc =
                                partial.lock().unwrap_or_else(PoisonError::into_inner);
                            splat_pixel(
                                &mut acc, input, kernel, center, threshold, knee_width, index,
                            );
                        }
                        done.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }

            // Coordinator: progress counter plus periodic preview.
            let mut last_snapshot = Instant::now();
            loop {
                let d = done.load(Ordering::Relaxed);
                ctx.state.set_progress(Progress::Pixels { done: d, total });
                if d >= total || ctx.state.cancel_requested() {
                    break;
                }
                if last_snapshot.elapsed() >= SNAPSHOT_INTERVAL {
                    last_snapshot = Instant::now();
                    ctx.preview.replace(sum_partials(&partials, iw, ih));
                }
                std::thread::sleep(TICK);
            }
        });

        ctx.state.check_canceled()?;
        Ok(sum_partials(&partials, iw, ih))
    }
}

/// Sums the per-thread accumulators into a display-ready buffer: scaled by
/// the global convolution multiplier, clamped at zero, opaque alpha.
fn sum_partials(partials: &[Mutex<Vec<f32>>], width: u32, height: u32) -> PixelBuffer {
    let mut out = PixelBuffer::new(width, height);
    let data = out.data_mut();
    for partial in partials {
        let acc = partial.lock().unwrap_or_else(PoisonError::into_inner);
        for (dst, src) in data.chunks_exact_mut(4).zip(acc.chunks_exact(4)) {
            dst[0] += src[0];
            dst[1] += src[1];
            dst[2] += src[2];
        }
    }
    for px in data.chunks_exact_mut(4) {
        px[0] = (px[0] * CONV_MULTIPLIER).max(0.0);
        px[1] = (px[1] * CONV_MULTIPLIER).max(0.0);
        px[2] = (px[2] * CONV_MULTIPLIER).max(0.0);
        px[3] = 1.0;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ConvolutionParams;
    use crate::state::RunState;
    use bloom_core::SharedImage;

    fn run_naive(
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
        NaiveCpuBackend.run(&ctx).unwrap()
    }

    #[test]
    fn test_impulse_stamps_kernel() {
        let mut input = PixelBuffer::new(16, 16);
        let idx = input.offset(8, 8);
        input.data_mut()[idx..idx + 3].copy_from_slice(&[1024.0, 1024.0, 1024.0]);

        let mut kernel = PixelBuffer::new(3, 3);
        kernel.fill([1.0, 0.5, 0.25, 1.0]);

        let params = ConvolutionParams {
            threads: 2,
            ..Default::default()
        };
        let out = run_naive(&input, &kernel, &params);

        // Kernel center (1, 1) anchors the stamp on the bright pixel.
        let center = out.offset(8, 8);
        assert!((out.data()[center] - 1.0).abs() < 1e-4);
        assert!((out.data()[center + 1] - 0.5).abs() < 1e-4);
        let corner = out.offset(7, 7);
        assert!((out.data()[corner] - 1.0).abs() < 1e-4);
        let outside = out.offset(4, 4);
        assert_eq!(out.data()[outside], 0.0);
    }

    #[test]
    fn test_splat_clips_at_borders() {
        let mut input = PixelBuffer::new(4, 4);
        let idx = input.offset(0, 0);
        input.data_mut()[idx..idx + 3].copy_from_slice(&[1.0, 1.0, 1.0]);

        let mut kernel = PixelBuffer::new(5, 5);
        kernel.fill([1.0, 1.0, 1.0, 1.0]);

        let out = run_naive(
            &input,
            &kernel,
            &ConvolutionParams {
                threads: 1,
                ..Default::default()
            },
        );
        // Taps off the top-left edge were dropped, the rest landed.
        assert!(out.data()[out.offset(0, 0)] > 0.0);
        assert!(out.data()[out.offset(2, 2)] > 0.0);
        assert_eq!(out.data()[out.offset(3, 3)], 0.0);
    }

    #[test]
    fn test_thread_counts_agree() {
        let mut input = PixelBuffer::new(12, 9);
        for (i, px) in input.data_mut().chunks_exact_mut(4).enumerate() {
            px[0] = (i % 5) as f32;
            px[1] = (i % 3) as f32;
            px[2] = 0.5;
        }
        let mut kernel = PixelBuffer::new(3, 3);
        kernel.fill([0.5, 1.0, 0.25, 1.0]);

        let single = run_naive(
            &input,
            &kernel,
            &ConvolutionParams {
                threads: 1,
                ..Default::default()
            },
        );
        let multi = run_naive(
            &input,
            &kernel,
            &ConvolutionParams {
                threads: 4,
                ..Default::default()
            },
        );
        for (a, b) in single.data().iter().zip(multi.data().iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}

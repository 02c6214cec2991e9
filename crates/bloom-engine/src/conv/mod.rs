//! Convolution engine.
//!
//! [`ConvolutionEngine`] owns the run lifecycle: it snapshots its
//! parameters and input buffers, launches one background thread, and lets
//! the selected backend do the work. The caller observes progress through
//! [`RunState`] and the shared preview buffer, and can cancel at any time;
//! `cancel()` blocks until the background thread has exited.
//!
//! Backends implement [`ConvolveBackend`] and are selected exactly once at
//! launch. All of them consume the same prepared kernel and the same
//! thresholded input semantics, so switching backends changes speed, not
//! meaning.

pub mod fft;
pub mod naive;
pub mod remote;

use crate::kernel::transform_kernel;
use crate::params::{BlendParams, ConvolutionBackend, ConvolutionParams};
use crate::state::{RunState, RunStatus};
use bloom_core::{Error, PixelBuffer, Result, SharedImage};
use bloom_math::fft::conv_padding;
use bloom_math::{grayscale_rgb, lerp, soft_threshold, transform_knee, GrayscaleMode};
use rayon::prelude::*;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info};

/// Everything a backend needs for one run. All references point at private
/// snapshots except `state` and `preview`, which are the live channels
/// back to the caller.
pub struct ConvContext<'a> {
    /// Live run state: cancel flag and progress sink.
    pub state: &'a RunState,
    /// Shared preview buffer for progress snapshots.
    pub preview: &'a SharedImage,
    /// Parameter snapshot taken at launch.
    pub params: &'a ConvolutionParams,
    /// Input snapshot.
    pub input: &'a PixelBuffer,
    /// Prepared (transformed) kernel.
    pub kernel: &'a PixelBuffer,
}

/// One convolution strategy. Implementations return the raw, un-blended
/// output at input dimensions.
pub trait ConvolveBackend {
    /// Runs the convolution to completion, honoring the context's cancel
    /// flag and reporting progress through its state.
    fn run(&mut self, ctx: &ConvContext<'_>) -> Result<PixelBuffer>;
}

/// The shared image slots a convolution engine reads and writes.
#[derive(Debug, Clone)]
pub struct ConvImages {
    /// Source image; snapshotted at launch.
    pub input: Arc<SharedImage>,
    /// Kernel source; transformed at launch.
    pub kernel: Arc<SharedImage>,
    /// Progress snapshots during the run, final blended result after it.
    pub preview: Arc<SharedImage>,
    /// Raw convolution output, kept for re-blending.
    pub output: Arc<SharedImage>,
}

impl Default for ConvImages {
    fn default() -> Self {
        Self {
            input: Arc::new(SharedImage::default()),
            kernel: Arc::new(SharedImage::default()),
            preview: Arc::new(SharedImage::default()),
            output: Arc::new(SharedImage::default()),
        }
    }
}

struct Captured {
    input: PixelBuffer,
}

struct EngineShared {
    state: RunState,
    images: ConvImages,
    captured: Mutex<Option<Captured>>,
}

/// Background-threaded convolution engine with cooperative cancellation.
pub struct ConvolutionEngine {
    shared: Arc<EngineShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConvolutionEngine {
    /// Creates an engine operating on the given image slots.
    pub fn new(images: ConvImages) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                state: RunState::new(),
                images,
                captured: Mutex::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    /// The image slots this engine reads and writes.
    pub fn images(&self) -> &ConvImages {
        &self.shared.images
    }

    /// Snapshot of the engine's run state.
    pub fn status(&self) -> RunStatus {
        self.shared.state.status()
    }

    /// `true` while a run is in progress.
    pub fn is_working(&self) -> bool {
        self.shared.state.is_working()
    }

    /// Launches a convolution run on a background thread.
    ///
    /// Any run still in progress is canceled first. The parameter snapshot
    /// and input/kernel snapshots are taken before the thread starts, so
    /// later edits cannot affect this run.
    pub fn convolve(&self, params: ConvolutionParams) {
        self.cancel();
        self.shared.state.begin();

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || {
            let result = run_convolution(&shared, params);
            shared.state.finish(result);
        });
        *lock(&self.handle) = Some(handle);
    }

    /// Cancels the current run, if any, and blocks until the background
    /// thread has exited. The state lands back in `Idle`.
    pub fn cancel(&self) {
        if self.is_working() {
            self.shared.state.request_cancel();
        }
        self.wait();
    }

    /// Blocks until the current run finishes (without canceling it).
    pub fn wait(&self) {
        if let Some(handle) = lock(&self.handle).take() {
            let _ = handle.join();
        }
    }

    /// Builds a threshold preview from the current input: pixels below the
    /// threshold go black, pixels above keep their color scaled by the
    /// knee ramp. Returns the preview and the count of passing pixels.
    pub fn threshold_preview(&self, threshold: f32, knee: f32) -> (PixelBuffer, u64) {
        let input = self.shared.images.input.snapshot();
        let knee_width = transform_knee(knee);
        let (w, h) = input.dimensions();

        let mut out = PixelBuffer::new(w, h);
        let passing: u64 = out
            .data_mut()
            .par_chunks_exact_mut(4)
            .zip(input.data().par_chunks_exact(4))
            .map(|(dst, src)| {
                let gray = grayscale_rgb(src[0], src[1], src[2], GrayscaleMode::Luminance);
                if gray < threshold {
                    dst[3] = 1.0;
                    return 0;
                }
                let mul = soft_threshold(gray, threshold, knee_width);
                dst[0] = src[0] * mul;
                dst[1] = src[1] * mul;
                dst[2] = src[2] * mul;
                dst[3] = 1.0;
                1
            })
            .sum();
        (out, passing)
    }

    /// Re-composites the last run's output over its captured input with
    /// new blend parameters, without recomputing the convolution. The
    /// result is also stored in the preview slot.
    pub fn blend(&self, blend: &BlendParams) -> Result<PixelBuffer> {
        let captured = lock(&self.shared.captured);
        let captured = captured
            .as_ref()
            .ok_or_else(|| Error::config("no convolution result to blend"))?;
        let output = self.shared.images.output.snapshot();

        let blended = blend_buffers(&captured.input, &output, blend)?;
        self.shared.images.preview.store(&blended);
        Ok(blended)
    }

    /// Estimates the memory a run with these parameters would need, from
    /// the current input and kernel dimensions.
    pub fn resource_estimate(&self, params: &ConvolutionParams) -> ResourceEstimate {
        let (iw, ih) = self.shared.images.input.lock().dimensions();
        let (kw, kh) = self.shared.images.kernel.lock().dimensions();
        ResourceEstimate::compute(params, (iw, ih), (kw, kh))
    }
}

impl Default for ConvolutionEngine {
    fn default() -> Self {
        Self::new(ConvImages::default())
    }
}

impl Drop for ConvolutionEngine {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_convolution(shared: &EngineShared, params: ConvolutionParams) -> Result<()> {
    let started = std::time::Instant::now();

    let kernel_src = shared.images.kernel.snapshot();
    let kernel_params = crate::params::KernelParams {
        preview_center: false,
        ..params.kernel.clone()
    };
    let kernel = transform_kernel(&kernel_src, &kernel_params)?;
    shared.state.check_canceled()?;

    let input = shared.images.input.snapshot();
    debug!(
        backend = ?params.backend,
        input_w = input.width(),
        input_h = input.height(),
        kernel_w = kernel.width(),
        kernel_h = kernel.height(),
        "starting convolution"
    );

    let mut backend: Box<dyn ConvolveBackend> = match params.backend {
        ConvolutionBackend::Fft => Box::new(fft::FftBackend::default()),
        ConvolutionBackend::NaiveCpu => Box::new(naive::NaiveCpuBackend),
        ConvolutionBackend::NaiveWorker => Box::new(remote::RemoteBackend),
    };

    let ctx = ConvContext {
        state: &shared.state,
        preview: &shared.images.preview,
        params: &params,
        input: &input,
        kernel: &kernel,
    };
    let output = backend.run(&ctx)?;

    shared.images.output.store(&output);
    let blended = blend_buffers(&input, &output, &params.blend)?;
    shared.images.preview.store(&blended);
    *lock(&shared.captured) = Some(Captured { input });

    info!(elapsed = ?started.elapsed(), "convolution finished");
    Ok(())
}

/// Composites the convolution layer over the input layer.
pub fn blend_buffers(
    input: &PixelBuffer,
    conv: &PixelBuffer,
    blend: &BlendParams,
) -> Result<PixelBuffer> {
    if input.dimensions() != conv.dimensions() {
        return Err(Error::internal(format!(
            "blend layer size mismatch: input {:?}, conv {:?}",
            input.dimensions(),
            conv.dimensions()
        )));
    }

    let conv_mul = bloom_math::exposure_mul(blend.exposure);
    let (w, h) = input.dimensions();
    let mut out = PixelBuffer::new(w, h);
    out.data_mut()
        .par_chunks_exact_mut(4)
        .zip(input.data().par_chunks_exact(4))
        .zip(conv.data().par_chunks_exact(4))
        .for_each(|((dst, a), b)| {
            for c in 0..3 {
                dst[c] = if blend.additive {
                    a[c] * blend.input_weight + b[c] * blend.conv_weight * conv_mul
                } else {
                    lerp(a[c], b[c] * conv_mul, blend.mix.clamp(0.0, 1.0))
                };
            }
            dst[3] = 1.0;
        });
    Ok(out)
}

/// Rough memory footprint of a run, for display before launching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceEstimate {
    /// Input pixel count.
    pub input_pixels: u64,
    /// Kernel pixel count.
    pub kernel_pixels: u64,
    /// FFT backend only: padded transform dimensions.
    pub padded: Option<(u32, u32)>,
    /// Estimated host memory in bytes.
    pub ram_bytes: u64,
    /// Estimated worker-side memory in bytes (worker backend only).
    pub worker_bytes: u64,
}

impl ResourceEstimate {
    const BYTES_PER_PIXEL: u64 = 16;

    fn compute(params: &ConvolutionParams, input: (u32, u32), kernel: (u32, u32)) -> Self {
        let input_pixels = input.0 as u64 * input.1 as u64;
        let kernel_pixels = kernel.0 as u64 * kernel.1 as u64;
        let base = (input_pixels * 2 + kernel_pixels) * Self::BYTES_PER_PIXEL;

        match params.backend {
            ConvolutionBackend::Fft => {
                let (pw, ph) = conv_padding(
                    input.0,
                    input.1,
                    kernel.0,
                    kernel.1,
                    params.kernel.center[0],
                    params.kernel.center[1],
                );
                // Two complex padded buffers of 8 bytes per element.
                let fft_bytes = pw as u64 * ph as u64 * 8 * 2;
                Self {
                    input_pixels,
                    kernel_pixels,
                    padded: Some((pw, ph)),
                    ram_bytes: base + fft_bytes,
                    worker_bytes: 0,
                }
            }
            ConvolutionBackend::NaiveCpu => Self {
                input_pixels,
                kernel_pixels,
                padded: None,
                ram_bytes: base
                    + input_pixels * Self::BYTES_PER_PIXEL * params.threads.max(1) as u64,
                worker_bytes: 0,
            },
            ConvolutionBackend::NaiveWorker => Self {
                input_pixels,
                kernel_pixels,
                padded: None,
                // Request, response, and stat files each carry an
                // input-sized buffer.
                ram_bytes: base + input_pixels * Self::BYTES_PER_PIXEL * 2,
                worker_bytes: (input_pixels * 2 + kernel_pixels) * Self::BYTES_PER_PIXEL,
            },
        }
    }
}

impl std::fmt::Display for ResourceEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mib = |b: u64| b as f64 / (1024.0 * 1024.0);
        write!(f, "~{:.1} MiB RAM", mib(self.ram_bytes))?;
        if self.worker_bytes > 0 {
            write!(f, ", ~{:.1} MiB worker", mib(self.worker_bytes))?;
        }
        if let Some((pw, ph)) = self.padded {
            write!(f, " (padded {pw}x{ph})")?;
        }
        Ok(())
    }
}

/// Maps a normalized kernel center onto a texel coordinate.
pub(crate) fn center_texel(dims: (u32, u32), center: [f32; 2]) -> (u32, u32) {
    let cx = ((center[0].clamp(0.0, 1.0) * dims.0 as f32).floor() as u32).min(dims.0 - 1);
    let cy = ((center[1].clamp(0.0, 1.0) * dims.1 as f32).floor() as u32).min(dims.1 - 1);
    (cx, cy)
}

/// Per-pixel contribution multiplier of the threshold stage: zero below
/// the threshold, knee ramp above it.
#[inline]
pub(crate) fn threshold_mul(gray: f32, threshold: f32, knee_width: f32) -> f32 {
    if gray < threshold {
        0.0
    } else {
        soft_threshold(gray, threshold, knee_width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Phase;

    fn bright_pixel_input(w: u32, h: u32, x: u32, y: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h);
        let idx = buf.offset(x, y);
        buf.data_mut()[idx..idx + 3].copy_from_slice(&[4.0, 4.0, 4.0]);
        buf
    }

    fn small_engine() -> ConvolutionEngine {
        let engine = ConvolutionEngine::default();
        engine.images().input.store(&bright_pixel_input(16, 16, 8, 8));
        let mut kernel = PixelBuffer::new(3, 3);
        kernel.fill([1.0, 1.0, 1.0, 1.0]);
        engine.images().kernel.store(&kernel);
        engine
    }

    #[test]
    fn test_fft_run_reaches_done() {
        let engine = small_engine();
        engine.convolve(ConvolutionParams {
            backend: ConvolutionBackend::Fft,
            kernel: crate::params::KernelParams {
                auto_exposure: false,
                ..Default::default()
            },
            ..Default::default()
        });
        engine.wait();

        let status = engine.status();
        assert_eq!(status.phase, Phase::Done, "error: {:?}", status.error);
        // Energy landed around the bright pixel.
        let output = engine.images().output.snapshot();
        let idx = output.offset(8, 8);
        assert!(output.data()[idx] > 0.0);
    }

    #[test]
    fn test_naive_cpu_run_reaches_done() {
        let engine = small_engine();
        engine.convolve(ConvolutionParams {
            backend: ConvolutionBackend::NaiveCpu,
            threads: 2,
            ..Default::default()
        });
        engine.wait();
        assert_eq!(engine.status().phase, Phase::Done);
    }

    #[test]
    fn test_worker_backend_without_exe_fails_with_config() {
        let engine = small_engine();
        engine.convolve(ConvolutionParams {
            backend: ConvolutionBackend::NaiveWorker,
            worker_exe: None,
            ..Default::default()
        });
        engine.wait();

        let status = engine.status();
        assert_eq!(status.phase, Phase::Failed);
        assert!(status.error.as_deref().unwrap().contains("worker"));
    }

    #[test]
    fn test_threshold_preview_monotonic_count() {
        let engine = ConvolutionEngine::default();
        let mut input = PixelBuffer::new(4, 4);
        for (i, px) in input.data_mut().chunks_exact_mut(4).enumerate() {
            let v = i as f32 / 15.0;
            px[0] = v;
            px[1] = v;
            px[2] = v;
        }
        engine.images().input.store(&input);

        let mut last = u64::MAX;
        for t in [0.0, 0.25, 0.5, 0.75, 1.1] {
            let (_, passing) = engine.threshold_preview(t, 0.0);
            assert!(passing <= last);
            last = passing;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn test_blend_additive_and_mix() {
        let mut a = PixelBuffer::new(1, 1);
        a.data_mut()[..3].copy_from_slice(&[1.0, 0.0, 0.0]);
        let mut b = PixelBuffer::new(1, 1);
        b.data_mut()[..3].copy_from_slice(&[0.0, 2.0, 0.0]);

        let additive = blend_buffers(
            &a,
            &b,
            &BlendParams {
                additive: true,
                input_weight: 1.0,
                conv_weight: 0.5,
                exposure: 1.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(additive.data()[0], 1.0);
        assert_eq!(additive.data()[1], 2.0);

        let mixed = blend_buffers(
            &a,
            &b,
            &BlendParams {
                additive: false,
                mix: 0.5,
                exposure: 0.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(mixed.data()[0], 0.5);
        assert_eq!(mixed.data()[1], 1.0);
    }

    #[test]
    fn test_blend_requires_a_finished_run() {
        let engine = ConvolutionEngine::default();
        assert!(engine.blend(&BlendParams::default()).is_err());
    }

    #[test]
    fn test_resource_estimate_shapes() {
        let engine = small_engine();
        let fft = engine.resource_estimate(&ConvolutionParams::default());
        assert!(fft.padded.is_some());
        assert!(fft.ram_bytes > 0);

        let worker = engine.resource_estimate(&ConvolutionParams {
            backend: ConvolutionBackend::NaiveWorker,
            ..Default::default()
        });
        assert!(worker.worker_bytes > 0);
        assert!(!worker.to_string().is_empty());
    }

    #[test]
    fn test_cancel_returns_to_idle_and_relaunch_succeeds() {
        let engine = ConvolutionEngine::default();
        // Large enough that the naive run does not finish instantly.
        let mut input = PixelBuffer::new(128, 128);
        input.fill([1.0, 1.0, 1.0, 1.0]);
        engine.images().input.store(&input);
        let mut kernel = PixelBuffer::new(64, 64);
        kernel.fill([1.0, 1.0, 1.0, 1.0]);
        engine.images().kernel.store(&kernel);

        engine.convolve(ConvolutionParams {
            backend: ConvolutionBackend::NaiveCpu,
            threads: 1,
            ..Default::default()
        });
        engine.cancel();

        let status = engine.status();
        assert_eq!(status.phase, Phase::Idle);
        assert!(status.error.is_none());

        // A fresh run after cancellation completes normally.
        engine.images().input.store(&bright_pixel_input(8, 8, 4, 4));
        engine.images().kernel.store(&PixelBuffer::new(3, 3));
        engine.convolve(ConvolutionParams {
            backend: ConvolutionBackend::NaiveCpu,
            threads: 1,
            ..Default::default()
        });
        engine.wait();
        assert_eq!(engine.status().phase, Phase::Done);
    }
}

//! Chromatic dispersion engine.
//!
//! Dispersion accumulates radially scaled copies of the input, each tinted
//! by the eye's response at one wavelength. Step `i` of `n` resamples the
//! input about its center at `scale = lerp(1 - amount/2, 1 + amount/2,
//! (i+1)/n)` and adds `sample_rgb / scale^2` of it; the area term keeps a
//! magnified copy from outweighing a shrunken one. A single step is an
//! unscaled colorized copy.
//!
//! The CPU backend round-robins steps across threads with private
//! accumulators, same shape as the naive convolution. The worker backend
//! ships one request to the external executable.

use crate::cmf::CmfTable;
use crate::conv::naive::RasterView;
use crate::params::{DispersionBackend, DispersionParams};
use crate::state::{Progress, RunState, RunStatus};
use crate::worker::WorkerProcess;
use bloom_core::{Error, PixelBuffer, Result, SharedImage};
use bloom_math::{
    contrast_curve, exposure_mul, grayscale_rgb, lerp, Bilinear, GrayscaleMode, EPSILON,
};
use bloom_proto::{BinaryMessage, DispersionRequest, DispersionResponse, OpKind};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(1000);
const TICK: Duration = Duration::from_millis(33);

/// Radial scale factor for wavelength step `step` of `steps`.
///
/// A single step is pinned to 1 so `steps == 1` degenerates to an
/// unscaled colorized copy instead of inheriting the ramp's upper
/// endpoint.
pub fn scale_for_step(amount: f32, step: u32, steps: u32) -> f32 {
    if steps <= 1 {
        return 1.0;
    }
    let t = (step + 1) as f32 / steps as f32;
    lerp(1.0 - amount / 2.0, 1.0 + amount / 2.0, t).max(EPSILON)
}

/// Accumulates one output row of one dispersion step into `acc`.
///
/// `acc` is an input-sized flat RGBA accumulator. The input is resampled
/// about the raster center by `1 / scale` (skipped entirely at scale 1)
/// and added in weighted by `weight / scale^2`.
pub fn accumulate_row(acc: &mut [f32], input: &RasterView<'_>, y: u32, scale: f32, weight: [f32; 3]) {
    let w = input.width;
    let energy = 1.0 / (scale * scale);
    let wr = weight[0] * energy;
    let wg = weight[1] * energy;
    let wb = weight[2] * energy;

    if scale == 1.0 {
        let row = y as usize * w as usize * 4;
        for x in 0..w as usize {
            let idx = row + x * 4;
            acc[idx] += input.data[idx] * wr;
            acc[idx + 1] += input.data[idx + 1] * wg;
            acc[idx + 2] += input.data[idx + 2] * wb;
        }
        return;
    }

    let cx = w as f32 / 2.0;
    let cy = input.height as f32 / 2.0;
    let py = cy + (y as f32 + 0.5 - cy) / scale;
    for x in 0..w {
        let px = cx + (x as f32 + 0.5 - cx) / scale;
        let rgb = Bilinear::sample_rgb(input.data, w, input.height, px, py);
        let idx = (y as usize * w as usize + x as usize) * 4;
        acc[idx] += rgb[0] * wr;
        acc[idx + 1] += rgb[1] * wg;
        acc[idx + 2] += rgb[2] * wb;
    }
}

/// Accumulates one whole dispersion step. Used by the worker executable;
/// the engine's CPU backend drives [`accumulate_row`] directly so it can
/// interleave cancellation checks and preview snapshots.
pub fn accumulate_step(acc: &mut [f32], input: &RasterView<'_>, scale: f32, weight: [f32; 3]) {
    for y in 0..input.height {
        accumulate_row(acc, input, y, scale, weight);
    }
}

/// Input pre-pass: normalize by the peak channel value, grade contrast on
/// the RGB magnitude, apply exposure and tint, then restore the peak.
pub fn pre_grade(src: &PixelBuffer, params: &DispersionParams) -> PixelBuffer {
    let mut out = src.clone();
    let peak = out
        .data()
        .chunks_exact(4)
        .flat_map(|px| px[..3].iter().copied())
        .fold(0.0f32, f32::max);
    if peak <= EPSILON {
        return out;
    }

    let exp_mul = exposure_mul(params.exposure) * peak;
    let inv_peak = 1.0 / peak;
    for px in out.data_mut().chunks_exact_mut(4) {
        let mut r = px[0] * inv_peak;
        let mut g = px[1] * inv_peak;
        let mut b = px[2] * inv_peak;
        if params.contrast != 0.0 {
            let mag = grayscale_rgb(r, g, b, GrayscaleMode::Magnitude);
            if mag > EPSILON {
                let mul = contrast_curve(mag, params.contrast) / mag;
                r *= mul;
                g *= mul;
                b *= mul;
            }
        }
        px[0] = r * exp_mul * params.color[0];
        px[1] = g * exp_mul * params.color[1];
        px[2] = b * exp_mul * params.color[2];
        px[3] = 1.0;
    }
    out
}

/// The shared image slots a dispersion engine reads and writes.
#[derive(Debug, Clone)]
pub struct DispImages {
    /// Source image; snapshotted at launch.
    pub input: Arc<SharedImage>,
    /// Progress snapshots during the run, final result after it.
    pub preview: Arc<SharedImage>,
}

impl Default for DispImages {
    fn default() -> Self {
        Self {
            input: Arc::new(SharedImage::default()),
            preview: Arc::new(SharedImage::default()),
        }
    }
}

struct DispShared {
    state: RunState,
    images: DispImages,
    cmf: Mutex<CmfTable>,
}

/// Background-threaded dispersion engine with cooperative cancellation.
pub struct DispersionEngine {
    shared: Arc<DispShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DispersionEngine {
    /// Creates an engine operating on the given image slots, with the
    /// built-in CMF table.
    pub fn new(images: DispImages) -> Self {
        Self {
            shared: Arc::new(DispShared {
                state: RunState::new(),
                images,
                cmf: Mutex::new(CmfTable::builtin()),
            }),
            handle: Mutex::new(None),
        }
    }

    /// The image slots this engine reads and writes.
    pub fn images(&self) -> &DispImages {
        &self.shared.images
    }

    /// Replaces the wavelength-response table used by future runs.
    pub fn set_cmf(&self, table: CmfTable) {
        *lock(&self.shared.cmf) = table;
    }

    /// Snapshot of the engine's run state.
    pub fn status(&self) -> RunStatus {
        self.shared.state.status()
    }

    /// `true` while a run is in progress.
    pub fn is_working(&self) -> bool {
        self.shared.state.is_working()
    }

    /// Launches a dispersion run on a background thread, canceling any run
    /// still in progress first.
    pub fn disperse(&self, params: DispersionParams) {
        self.cancel();
        self.shared.state.begin();

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || {
            let result = run_dispersion(&shared, params);
            shared.state.finish(result);
        });
        *lock(&self.handle) = Some(handle);
    }

    /// Cancels the current run, if any, and blocks until the background
    /// thread has exited.
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
}

impl Default for DispersionEngine {
    fn default() -> Self {
        Self::new(DispImages::default())
    }
}

impl Drop for DispersionEngine {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_dispersion(shared: &DispShared, params: DispersionParams) -> Result<()> {
    let started = Instant::now();
    let steps = params.steps.max(1);
    let amount = params.amount.clamp(0.0, 1.0);

    let samples = lock(&shared.cmf).sample(steps)?;
    let input = shared.images.input.snapshot();
    let graded = pre_grade(&input, &params);
    shared.state.check_canceled()?;

    debug!(backend = ?params.backend, steps, amount, "starting dispersion");
    let result = match params.backend {
        DispersionBackend::Cpu => {
            cpu_disperse(&shared.state, &shared.images.preview, &graded, &samples, amount, &params)?
        }
        DispersionBackend::Worker => worker_disperse(&shared.state, &graded, &samples, amount, &params)?,
    };

    shared.images.preview.store(&result);
    info!(elapsed = ?started.elapsed(), "dispersion finished");
    Ok(())
}

fn cpu_disperse(
    state: &RunState,
    preview: &SharedImage,
    input: &PixelBuffer,
    samples: &[[f32; 3]],
    amount: f32,
    params: &DispersionParams,
) -> Result<PixelBuffer> {
    let steps = samples.len() as u32;
    let threads = params.threads.max(1).min(steps) as usize;
    let (w, h) = input.dimensions();
    let len = w as usize * h as usize * 4;

    let view = RasterView::from(input);
    let steps_done = AtomicU32::new(0);
    let partials: Vec<Mutex<Vec<f32>>> =
        (0..threads).map(|_| Mutex::new(vec![0.0f32; len])).collect();

    std::thread::scope(|scope| {
        for (tid, partial) in partials.iter().enumerate() {
            let steps_done = &steps_done;
            let view = &view;
            scope.spawn(move || {
                for step in (tid as u32..steps).step_by(threads) {
                    let scale = scale_for_step(amount, step, steps);
                    let weight = samples[step as usize];
                    for y in 0..h {
                        if state.cancel_requested() {
                            return;
                        }
                        let mut acc = partial.lock().unwrap_or_else(PoisonError::into_inner);
                        accumulate_row(&mut acc, view, y, scale, weight);
                    }
                    steps_done.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        let mut last_snapshot = Instant::now();
        loop {
            let done = steps_done.load(Ordering::Relaxed);
            state.set_progress(Progress::Steps { done, total: steps });
            if done >= steps || state.cancel_requested() {
                break;
            }
            if last_snapshot.elapsed() >= SNAPSHOT_INTERVAL {
                last_snapshot = Instant::now();
                preview.replace(sum_partials(&partials, w, h));
            }
            std::thread::sleep(TICK);
        }
    });

    state.check_canceled()?;
    Ok(sum_partials(&partials, w, h))
}

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
        px[3] = 1.0;
    }
    out
}

fn worker_disperse(
    state: &RunState,
    input: &PixelBuffer,
    samples: &[[f32; 3]],
    amount: f32,
    params: &DispersionParams,
) -> Result<PixelBuffer> {
    let exe = params.worker_exe.as_deref().ok_or_else(|| {
        Error::config("worker backend selected but no worker executable configured")
    })?;
    let (w, h) = input.dimensions();

    let mut process = WorkerProcess::prepare()?;
    let request = DispersionRequest {
        amount,
        steps: samples.len() as u32,
        input_width: w,
        input_height: h,
        input_buffer: input.data().to_vec(),
        cmf_samples: samples.iter().flatten().copied().collect(),
    };
    {
        let file = File::create(process.request_path())?;
        let mut writer = BufWriter::new(file);
        OpKind::Dispersion.write_tag(&mut writer).map_err(Error::from)?;
        request.write_to(&mut writer).map_err(Error::from)?;
        writer.flush()?;
    }

    process.spawn(exe)?;
    // Dispersion has no mid-run snapshots; the stat file is only the
    // worker's liveness marker.
    process.drive(state, |_| {})?;

    let file = File::open(process.response_path())?;
    let response =
        DispersionResponse::read_from(&mut BufReader::new(file)).map_err(Error::from)?;
    if response.status != 1 {
        return Err(Error::process(format!(
            "worker reported failure: {}",
            response.error
        )));
    }
    PixelBuffer::from_vec(w, h, response.buffer)
        .ok_or_else(|| Error::stream("worker response buffer does not match input dimensions"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Phase;
    use approx::assert_relative_eq;

    fn centered_dot(w: u32, h: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h);
        let idx = buf.offset(w / 2, h / 2);
        buf.data_mut()[idx..idx + 3].copy_from_slice(&[1.0, 1.0, 1.0]);
        buf
    }

    #[test]
    fn test_scale_ramp_endpoints() {
        assert_relative_eq!(scale_for_step(0.4, 0, 2), 0.8 + 0.2);
        assert_relative_eq!(scale_for_step(0.4, 1, 2), 1.2);
        // The ramp tightens around 1 as amount shrinks.
        assert_relative_eq!(scale_for_step(0.0, 5, 10), 1.0);
    }

    #[test]
    fn test_single_step_is_unscaled() {
        for amount in [0.0, 0.5, 1.0] {
            assert_eq!(scale_for_step(amount, 0, 1), 1.0);
        }
    }

    #[test]
    fn test_single_step_run_is_colorized_copy() {
        let engine = DispersionEngine::default();
        engine.images().input.store(&centered_dot(9, 9));
        engine.disperse(DispersionParams {
            steps: 1,
            amount: 0.9,
            threads: 1,
            ..Default::default()
        });
        engine.wait();
        assert_eq!(engine.status().phase, Phase::Done);

        let out = engine.images().preview.snapshot();
        // One sample, luminance-normalized: the dot stays a single texel
        // with unit total luminance.
        let idx = out.offset(4, 4);
        let px = &out.data()[idx..idx + 3];
        let lum = grayscale_rgb(px[0], px[1], px[2], GrayscaleMode::Luminance);
        assert_relative_eq!(lum, 1.0, epsilon = 1e-3);

        let lit = out
            .data()
            .chunks_exact(4)
            .filter(|px| px[0] + px[1] + px[2] > 1e-6)
            .count();
        assert_eq!(lit, 1);
    }

    #[test]
    fn test_dispersion_spreads_energy_radially() {
        let engine = DispersionEngine::default();
        engine.images().input.store(&centered_dot(33, 33));
        engine.disperse(DispersionParams {
            steps: 8,
            amount: 1.0,
            threads: 2,
            ..Default::default()
        });
        engine.wait();
        assert_eq!(engine.status().phase, Phase::Done);

        let out = engine.images().preview.snapshot();
        let lit = out
            .data()
            .chunks_exact(4)
            .filter(|px| px[0] + px[1] + px[2] > 1e-6)
            .count();
        // Multiple scaled copies light more than the original texel.
        assert!(lit > 1, "lit = {lit}");
    }

    #[test]
    fn test_pre_grade_peak_restored() {
        let mut src = PixelBuffer::new(2, 2);
        src.data_mut()[0] = 8.0;
        let graded = pre_grade(&src, &DispersionParams::default());
        // Identity grade: nothing moves.
        assert_relative_eq!(graded.data()[0], 8.0, epsilon = 1e-4);
    }

    #[test]
    fn test_pre_grade_exposure() {
        let mut src = PixelBuffer::new(1, 1);
        src.data_mut()[..3].copy_from_slice(&[1.0, 0.5, 0.25]);
        let graded = pre_grade(
            &src,
            &DispersionParams {
                exposure: 1.0,
                ..Default::default()
            },
        );
        assert_relative_eq!(graded.data()[0], 2.0, epsilon = 1e-5);
        assert_relative_eq!(graded.data()[1], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_cancel_resets_to_idle() {
        let engine = DispersionEngine::default();
        let mut input = PixelBuffer::new(256, 256);
        input.fill([1.0, 1.0, 1.0, 1.0]);
        engine.images().input.store(&input);

        engine.disperse(DispersionParams {
            steps: 256,
            threads: 1,
            ..Default::default()
        });
        engine.cancel();

        let status = engine.status();
        assert_eq!(status.phase, Phase::Idle);
        assert!(status.error.is_none());
    }
}

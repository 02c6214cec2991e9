//! Engine parameter sets.
//!
//! Every run starts by snapshotting one of these structs; the background
//! thread only ever sees its private copy, so mid-run edits by the caller
//! cannot race a computation.

use std::path::PathBuf;

/// Global convolution normalization constant.
///
/// Every convolution output is scaled by this before display so kernel
/// energy sums near 1024 map to unit brightness. Auto-exposure cancels it
/// exactly.
pub const CONV_MULTIPLIER: f32 = 1.0 / 1024.0;

/// Which convolution backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvolutionBackend {
    /// Frequency-domain convolution via 2-D FFT. Fastest for large kernels.
    #[default]
    Fft,
    /// Direct splatting on a pool of CPU threads.
    NaiveCpu,
    /// Direct splatting delegated to the external worker process.
    NaiveWorker,
}

/// Which dispersion backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispersionBackend {
    /// Wavelength steps round-robined across CPU threads.
    #[default]
    Cpu,
    /// One-shot delegation to the external worker process.
    Worker,
}

/// Kernel preparation parameters, applied before any convolution backend
/// sees the kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelParams {
    /// Exposure adjustment in stops (multiplier `2^exposure`).
    pub exposure: f32,
    /// Contrast strength in `[-1, 1]`, 0 = identity.
    pub contrast: f32,
    /// Per-channel RGB tint.
    pub color: [f32; 3],
    /// Rotation about the kernel center, in degrees.
    pub rotation: f32,
    /// Non-uniform scale factors `[x, y]`.
    pub scale: [f32; 2],
    /// Crop fractions `[x, y]` in `(0, 1]`, anchored by `center`.
    pub crop: [f32; 2],
    /// Normalized kernel center in `[0, 1]^2`.
    pub center: [f32; 2],
    /// Rescale the kernel so its total energy cancels [`CONV_MULTIPLIER`].
    pub auto_exposure: bool,
    /// Draw a crosshair at the kernel center (interactive previews only).
    pub preview_center: bool,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            exposure: 0.0,
            contrast: 0.0,
            color: [1.0, 1.0, 1.0],
            rotation: 0.0,
            scale: [1.0, 1.0],
            crop: [1.0, 1.0],
            center: [0.5, 0.5],
            auto_exposure: true,
            preview_center: false,
        }
    }
}

/// How the convolution result is composited over the captured input.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendParams {
    /// `true`: weighted sum of the two layers. `false`: linear mix by [`Self::mix`].
    pub additive: bool,
    /// Input layer weight (additive mode).
    pub input_weight: f32,
    /// Convolution layer weight (additive mode).
    pub conv_weight: f32,
    /// Mix factor in `[0, 1]` (mix mode), 0 = input only.
    pub mix: f32,
    /// Exposure applied to the convolution layer, in stops.
    pub exposure: f32,
}

impl Default for BlendParams {
    fn default() -> Self {
        Self {
            additive: true,
            input_weight: 1.0,
            conv_weight: 1.0,
            mix: 0.2,
            exposure: 0.0,
        }
    }
}

/// Full parameter snapshot for one convolution run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionParams {
    /// Backend selection, resolved once at launch.
    pub backend: ConvolutionBackend,
    /// Kernel preparation pipeline parameters.
    pub kernel: KernelParams,
    /// Luminance threshold below which input pixels contribute nothing.
    pub threshold: f32,
    /// Knee controlling the soft ramp above the threshold.
    pub knee: f32,
    /// Thread count for the naive CPU backend.
    pub threads: u32,
    /// Chunk count for the worker backend's progress granularity.
    pub chunks: u32,
    /// Sleep between worker chunks, in milliseconds.
    pub chunk_sleep_ms: u32,
    /// FFT backend only: divide instead of multiply in the frequency domain.
    pub deconvolve: bool,
    /// Worker backend only: path to the worker executable.
    pub worker_exe: Option<PathBuf>,
    /// Compositing of the result over the captured input.
    pub blend: BlendParams,
}

impl Default for ConvolutionParams {
    fn default() -> Self {
        Self {
            backend: ConvolutionBackend::default(),
            kernel: KernelParams::default(),
            threshold: 0.0,
            knee: 0.0,
            threads: default_threads(),
            chunks: 10,
            chunk_sleep_ms: 0,
            deconvolve: false,
            worker_exe: None,
            blend: BlendParams::default(),
        }
    }
}

/// Full parameter snapshot for one dispersion run.
#[derive(Debug, Clone, PartialEq)]
pub struct DispersionParams {
    /// Backend selection, resolved once at launch.
    pub backend: DispersionBackend,
    /// Dispersion amount in `[0, 1]`: total spread of the radial scale.
    pub amount: f32,
    /// Number of wavelength steps to accumulate.
    pub steps: u32,
    /// Input pre-pass exposure, in stops.
    pub exposure: f32,
    /// Input pre-pass contrast in `[-1, 1]`.
    pub contrast: f32,
    /// Input pre-pass RGB tint.
    pub color: [f32; 3],
    /// Thread count for the CPU backend.
    pub threads: u32,
    /// Worker backend only: path to the worker executable.
    pub worker_exe: Option<PathBuf>,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            backend: DispersionBackend::default(),
            amount: 0.4,
            steps: 32,
            exposure: 0.0,
            contrast: 0.0,
            color: [1.0, 1.0, 1.0],
            threads: default_threads(),
            worker_exe: None,
        }
    }
}

/// Default worker-pool width: the machine's available parallelism.
pub fn default_threads() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_identity_shaped() {
        let k = KernelParams::default();
        assert_eq!(k.scale, [1.0, 1.0]);
        assert_eq!(k.crop, [1.0, 1.0]);
        assert_eq!(k.center, [0.5, 0.5]);
        assert_eq!(k.rotation, 0.0);
        assert!(k.auto_exposure);

        let c = ConvolutionParams::default();
        assert_eq!(c.backend, ConvolutionBackend::Fft);
        assert!(c.threads >= 1);
    }

    #[test]
    fn test_conv_multiplier() {
        assert_eq!(CONV_MULTIPLIER, 1.0 / 1024.0);
    }
}

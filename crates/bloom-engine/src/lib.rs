//! # bloom-engine
//!
//! Optical bloom simulation engines:
//!
//! - [`conv`] - Convolution bloom with FFT, naive-CPU, and worker-process
//!   backends, threshold previews, blend compositing, resource estimates
//! - [`dispersion`] - Chromatic dispersion by wavelength-stepped radial
//!   scaling
//! - [`diffraction`] - Far-field diffraction patterns of apertures
//! - [`kernel`] - Kernel preparation (scale, rotate, crop, normalize,
//!   grade, auto-exposure)
//! - [`cmf`] - Wavelength-response tables
//! - [`worker`] - External worker process lifecycle
//! - [`state`] - The shared run-state machine and progress reporting
//!
//! The convolution and dispersion engines run on background threads,
//! publish progress through [`state::RunState`] and shared preview
//! buffers, and support blocking cooperative cancellation.

#![warn(missing_docs)]

pub mod cmf;
pub mod conv;
pub mod diffraction;
pub mod dispersion;
pub mod kernel;
pub mod params;
pub mod state;
pub mod worker;

pub use cmf::{CmfRow, CmfTable};
pub use conv::{ConvImages, ConvolutionEngine, ResourceEstimate};
pub use diffraction::diffraction_pattern;
pub use dispersion::{DispImages, DispersionEngine};
pub use kernel::transform_kernel;
pub use params::{
    BlendParams, ConvolutionBackend, ConvolutionParams, DispersionBackend, DispersionParams,
    KernelParams, CONV_MULTIPLIER,
};
pub use state::{Phase, Progress, RunState, RunStatus};
pub use worker::WorkerProcess;

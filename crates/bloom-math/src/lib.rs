//! # bloom-math
//!
//! Math utilities for the lumenbloom compute pipeline:
//!
//! - [`interp`] - Interpolation, exposure/contrast curves, soft thresholding
//! - [`gray`] - Grayscale reductions used for threshold decisions
//! - [`bilinear`] - Bilinear resampling weights
//! - [`fft`] - 2-D FFT helpers and convolution padding

#![warn(missing_docs)]

pub mod bilinear;
pub mod fft;
pub mod gray;
pub mod interp;

pub use bilinear::Bilinear;
pub use gray::{grayscale_rgb, GrayscaleMode};
pub use interp::{
    contrast_curve, exposure_mul, lerp, rotate_point, soft_threshold, transform_knee,
};

/// Small positive epsilon used to guard divisions and clamp degenerate
/// parameters.
pub const EPSILON: f32 = 1e-6;

/// Returns `true` if `(x, y)` lies inside a `width` x `height` raster.
#[inline]
pub fn in_bounds(x: i64, y: i64, width: u32, height: u32) -> bool {
    x >= 0 && y >= 0 && x < width as i64 && y < height as i64
}

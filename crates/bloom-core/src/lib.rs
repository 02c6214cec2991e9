//! # bloom-core
//!
//! Core types shared by every lumenbloom crate.
//!
//! This crate provides the raster container the whole pipeline reads and
//! writes, plus the unified error taxonomy:
//!
//! - [`PixelBuffer`] - Owned RGBA32F raster, row-major, top-to-bottom
//! - [`SharedImage`] - Mutex-guarded buffer for handoff between stages
//! - [`Error`] / [`Result`] - Error taxonomy for the compute pipeline
//!
//! # Memory Layout
//!
//! Buffers store pixels in **row-major** order, top-to-bottom, with RGBA
//! interleaved:
//!
//! ```text
//! Memory: [R G B A R G B A ...]  ← Row 0
//!         [R G B A R G B A ...]  ← Row 1
//!         ...
//! ```
//!
//! The buffer length is always exactly `width * height * 4` floats.

#![warn(missing_docs)]

mod buffer;
mod error;

pub use buffer::{PixelBuffer, SharedImage};
pub use error::{Error, Result};

//! Kernel preparation pipeline.
//!
//! Every convolution backend receives its kernel through
//! [`transform_kernel`]: bilinear scale + rotate, crop anchored by the
//! declared center, peak normalization, contrast/exposure/tint grading, and
//! optional auto-exposure that cancels the global convolution multiplier.
//! Identity stages are skipped entirely, so a default parameter set is a
//! pure normalization.

use crate::params::{KernelParams, CONV_MULTIPLIER};
use bloom_core::{PixelBuffer, Result};
use bloom_math::{
    contrast_curve, exposure_mul, grayscale_rgb, rotate_point, Bilinear, GrayscaleMode, EPSILON,
};
use tracing::debug;

/// Runs the full kernel preparation pipeline.
pub fn transform_kernel(src: &PixelBuffer, params: &KernelParams) -> Result<PixelBuffer> {
    debug!(
        width = src.width(),
        height = src.height(),
        scale_x = params.scale[0],
        scale_y = params.scale[1],
        rotation = params.rotation,
        "transforming kernel"
    );

    let mut kernel = if params.scale != [1.0, 1.0] || params.rotation != 0.0 {
        scale_rotate(src, params)
    } else {
        src.clone()
    };

    if params.crop != [1.0, 1.0] {
        kernel = crop(&kernel, params);
    }

    normalize(&mut kernel);
    grade(&mut kernel, params);

    if params.auto_exposure {
        auto_expose(&mut kernel);
    }

    if params.preview_center {
        draw_center_marker(&mut kernel, params.center);
    }

    Ok(kernel)
}

/// Clamps a scale factor away from zero, preserving its sign (negative
/// scale mirrors the kernel).
fn clamp_scale(s: f32) -> f32 {
    if s.abs() < EPSILON {
        if s < 0.0 {
            -EPSILON
        } else {
            EPSILON
        }
    } else {
        s
    }
}

/// Combined inverse-mapped bilinear scale and rotation about the declared
/// kernel center.
fn scale_rotate(src: &PixelBuffer, params: &KernelParams) -> PixelBuffer {
    let sx = clamp_scale(params.scale[0]);
    let sy = clamp_scale(params.scale[1]);
    let (sw, sh) = src.dimensions();

    let ow = ((sw as f32 * sx.abs()).round() as u32).max(1);
    let oh = ((sh as f32 * sy.abs()).round() as u32).max(1);

    // The declared center stays at the same normalized position in the
    // scaled raster.
    let pivot_src = (params.center[0] * sw as f32, params.center[1] * sh as f32);
    let pivot_out = (params.center[0] * ow as f32, params.center[1] * oh as f32);

    let mut out = PixelBuffer::new(ow, oh);
    let src_data = src.data();
    for y in 0..oh {
        for x in 0..ow {
            let px = x as f32 + 0.5;
            let py = y as f32 + 0.5;

            let (rx, ry) = rotate_point(px, py, pivot_out.0, pivot_out.1, -params.rotation);
            let source_x = (rx - pivot_out.0) / sx + pivot_src.0;
            let source_y = (ry - pivot_out.1) / sy + pivot_src.1;

            let rgb = Bilinear::sample_rgb(src_data, sw, sh, source_x, source_y);
            let idx = out.offset(x, y);
            let data = out.data_mut();
            data[idx] = rgb[0];
            data[idx + 1] = rgb[1];
            data[idx + 2] = rgb[2];
            data[idx + 3] = 1.0;
        }
    }
    out
}

/// Crops to a sub-rectangle whose position keeps the declared center at
/// the same normalized coordinates.
fn crop(src: &PixelBuffer, params: &KernelParams) -> PixelBuffer {
    let (sw, sh) = src.dimensions();
    let fx = params.crop[0].clamp(EPSILON, 1.0);
    let fy = params.crop[1].clamp(EPSILON, 1.0);

    let cw = ((sw as f32 * fx).round() as u32).clamp(1, sw);
    let ch = ((sh as f32 * fy).round() as u32).clamp(1, sh);

    let ox = ((params.center[0] * (sw - cw) as f32).round() as u32).min(sw - cw);
    let oy = ((params.center[1] * (sh - ch) as f32).round() as u32).min(sh - ch);

    let mut out = PixelBuffer::new(cw, ch);
    for y in 0..ch {
        let src_start = src.offset(ox, oy + y);
        let dst_start = out.offset(0, y);
        let row = &src.data()[src_start..src_start + cw as usize * 4];
        out.data_mut()[dst_start..dst_start + cw as usize * 4].copy_from_slice(row);
    }
    out
}

/// Scales RGB so the peak channel value is 1.
fn normalize(kernel: &mut PixelBuffer) {
    let peak = kernel
        .data()
        .chunks_exact(4)
        .flat_map(|px| px[..3].iter().copied())
        .fold(0.0f32, f32::max);
    if peak <= EPSILON {
        return;
    }
    let inv = 1.0 / peak;
    for px in kernel.data_mut().chunks_exact_mut(4) {
        px[0] *= inv;
        px[1] *= inv;
        px[2] *= inv;
    }
}

/// Contrast curve on the RGB magnitude, exposure multiplier, and
/// per-channel tint, in one pass.
fn grade(kernel: &mut PixelBuffer, params: &KernelParams) {
    let exp_mul = exposure_mul(params.exposure);
    let color = params.color;
    if params.contrast == 0.0 && exp_mul == 1.0 && color == [1.0, 1.0, 1.0] {
        return;
    }

    for px in kernel.data_mut().chunks_exact_mut(4) {
        let mut mul = exp_mul;
        if params.contrast != 0.0 {
            let mag = grayscale_rgb(px[0], px[1], px[2], GrayscaleMode::Magnitude);
            if mag > EPSILON {
                mul *= contrast_curve(mag, params.contrast) / mag;
            }
        }
        px[0] *= mul * color[0];
        px[1] *= mul * color[1];
        px[2] *= mul * color[2];
    }
}

/// Rescales RGB so the grayscale energy sum cancels [`CONV_MULTIPLIER`]:
/// convolving with the result preserves overall input brightness.
fn auto_expose(kernel: &mut PixelBuffer) {
    let sum: f32 = kernel
        .data()
        .chunks_exact(4)
        .map(|px| grayscale_rgb(px[0], px[1], px[2], GrayscaleMode::Average))
        .sum();
    if sum <= EPSILON {
        return;
    }
    let mul = 1.0 / (sum * CONV_MULTIPLIER);
    for px in kernel.data_mut().chunks_exact_mut(4) {
        px[0] *= mul;
        px[1] *= mul;
        px[2] *= mul;
    }
}

/// Crosshair through the declared center, for interactive preview only.
fn draw_center_marker(kernel: &mut PixelBuffer, center: [f32; 2]) {
    const ARM: i64 = 5;
    let (w, h) = kernel.dimensions();
    let cx = ((center[0] * w as f32) as i64).clamp(0, w as i64 - 1);
    let cy = ((center[1] * h as f32) as i64).clamp(0, h as i64 - 1);

    let mut paint = |x: i64, y: i64| {
        if bloom_math::in_bounds(x, y, w, h) {
            let idx = kernel.offset(x as u32, y as u32);
            let data = kernel.data_mut();
            data[idx] = 1.0;
            data[idx + 1] = 0.0;
            data[idx + 2] = 0.0;
        }
    };
    for d in -ARM..=ARM {
        paint(cx + d, cy);
        paint(cx, cy + d);
    }
}

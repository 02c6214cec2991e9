//! Interpolation and radiometric curves.
//!
//! These are the scalar building blocks of the threshold, exposure, and
//! contrast stages:
//!
//! ```rust
//! use bloom_math::{lerp, soft_threshold, transform_knee};
//!
//! let mid = lerp(0.0, 10.0, 0.5);
//! assert_eq!(mid, 5.0);
//!
//! // Ramp a value in over a knee above the threshold
//! let knee = transform_knee(1.0);
//! let t = soft_threshold(0.6, 0.5, knee);
//! assert!(t > 0.0 && t <= 1.0);
//! ```

/// Linear interpolation between two values.
///
/// Returns `a` when `t = 0.0`, and `b` when `t = 1.0`. Values outside
/// `[0, 1]` extrapolate.
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Maps a knee parameter onto the ramp width used by [`soft_threshold`].
///
/// `2^v - 1`, clamped to zero for non-positive input, so knee 0 means a
/// hard cut and each unit of knee doubles the ramp width plus one.
#[inline]
pub fn transform_knee(v: f32) -> f32 {
    if v <= 0.0 {
        0.0
    } else {
        2.0_f32.powf(v) - 1.0
    }
}

/// Smooth ramp-in above a hard luminance threshold.
///
/// Returns the contribution multiplier in `[0, 1]` for a pixel whose
/// grayscale value `v` exceeds `threshold`. With a zero ramp width the
/// transition is a hard step.
#[inline]
pub fn soft_threshold(v: f32, threshold: f32, knee_width: f32) -> f32 {
    if knee_width > 0.0 {
        ((v - threshold) / knee_width).min(1.0)
    } else {
        1.0
    }
}

/// Photographic exposure multiplier, `2^stops`.
#[inline]
pub fn exposure_mul(stops: f32) -> f32 {
    2.0_f32.powf(stops)
}

/// Power contrast curve symmetric about a 0.5 pivot.
///
/// `contrast` in `[-1, 1]`; 0 is identity. Input is clamped to `[0, 1]`
/// and the upper half mirrors the lower, so `f(v) + f(1 - v) = 1` and the
/// output stays in `[0, 1]`. Positive values steepen the curve
/// (`c = 4k + 1`), negative values flatten it (`c = 1 / (1 - 4k)`).
#[inline]
pub fn contrast_curve(v: f32, contrast: f32) -> f32 {
    if v == 0.0 || contrast == 0.0 {
        return v;
    }
    let v = v.clamp(0.0, 1.0);
    let k = contrast * 4.0;
    let c = if k >= 0.0 { k + 1.0 } else { 1.0 / (1.0 - k) };
    let half_gain = 2.0_f32.powf(c) / 2.0;
    if v > 0.5 {
        1.0 - (1.0 - v).powf(c) * half_gain
    } else {
        v.powf(c) * half_gain
    }
}

/// Rotates `(x, y)` around `(pivot_x, pivot_y)` by `angle_deg` degrees.
#[inline]
pub fn rotate_point(x: f32, y: f32, pivot_x: f32, pivot_y: f32, angle_deg: f32) -> (f32, f32) {
    let rad = angle_deg.to_radians();
    let (s, c) = rad.sin_cos();
    (
        (x - pivot_x) * c - (y - pivot_y) * s + pivot_x,
        (x - pivot_x) * s + (y - pivot_y) * c + pivot_y,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lerp_endpoints() {
        assert_eq!(lerp(0.0, 10.0, 0.0), 0.0);
        assert_eq!(lerp(0.0, 10.0, 1.0), 10.0);
        assert_eq!(lerp(2.0, 4.0, 0.5), 3.0);
    }

    #[test]
    fn test_transform_knee() {
        assert_eq!(transform_knee(0.0), 0.0);
        assert_eq!(transform_knee(-3.0), 0.0);
        assert_relative_eq!(transform_knee(1.0), 1.0);
        assert_relative_eq!(transform_knee(2.0), 3.0);
    }

    #[test]
    fn test_soft_threshold_hard_cut() {
        // Zero knee width: anything above threshold contributes fully.
        assert_eq!(soft_threshold(0.51, 0.5, 0.0), 1.0);
    }

    #[test]
    fn test_soft_threshold_ramp() {
        let knee = 1.0;
        let lo = soft_threshold(0.6, 0.5, knee);
        let hi = soft_threshold(1.4, 0.5, knee);
        assert!(lo < hi);
        assert_relative_eq!(soft_threshold(2.0, 0.5, knee), 1.0);
    }

    #[test]
    fn test_contrast_identity() {
        for v in [0.0, 0.25, 0.5, 1.0, 2.0] {
            assert_eq!(contrast_curve(v, 0.0), v);
        }
        // The pivot is a fixed point regardless of strength.
        assert_relative_eq!(contrast_curve(0.5, 0.8), 0.5);
        assert_relative_eq!(contrast_curve(0.5, -0.8), 0.5);
    }

    #[test]
    fn test_contrast_symmetric_about_pivot() {
        for k in [0.25, 0.8, -0.5] {
            for v in [0.1, 0.25, 0.4] {
                assert_relative_eq!(
                    contrast_curve(v, k) + contrast_curve(1.0 - v, k),
                    1.0,
                    epsilon = 1e-5
                );
            }
        }
    }

    #[test]
    fn test_contrast_clamps_and_stays_bounded() {
        // Magnitude grayscale can exceed 1; the curve clamps first.
        assert_relative_eq!(contrast_curve(1.7, 0.5), 1.0, epsilon = 1e-6);
        for v in [0.0, 0.3, 0.7, 1.0, 1.5] {
            let out = contrast_curve(v, 0.9);
            assert!((0.0..=1.0).contains(&out), "f({v}) = {out}");
        }
    }

    #[test]
    fn test_exposure_mul() {
        assert_eq!(exposure_mul(0.0), 1.0);
        assert_eq!(exposure_mul(1.0), 2.0);
        assert_relative_eq!(exposure_mul(-1.0), 0.5);
    }

    #[test]
    fn test_rotate_point_quarter_turn() {
        let (x, y) = rotate_point(1.0, 0.0, 0.0, 0.0, 90.0);
        assert_relative_eq!(x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(y, 1.0, epsilon = 1e-6);
    }
}

//! Grayscale reductions.
//!
//! Thresholding and normalization reduce an RGB triple to a single scalar.
//! Different stages use different reductions: the convolution threshold
//! uses Rec. 709 luminance, contrast curves use vector magnitude, and
//! auto-exposure uses the channel average.

/// How to collapse RGB into one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrayscaleMode {
    /// Rec. 709 luminance weights.
    #[default]
    Luminance,
    /// Arithmetic mean of the channels.
    Average,
    /// Largest channel.
    Maximum,
    /// Euclidean length of the RGB vector.
    Magnitude,
}

/// Reduces an RGB triple to a scalar using `mode`.
#[inline]
pub fn grayscale_rgb(r: f32, g: f32, b: f32, mode: GrayscaleMode) -> f32 {
    match mode {
        GrayscaleMode::Luminance => r * 0.2126 + g * 0.7152 + b * 0.0722,
        GrayscaleMode::Average => (r + g + b) / 3.0,
        GrayscaleMode::Maximum => r.max(g).max(b),
        GrayscaleMode::Magnitude => (r * r + g * g + b * b).sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_luminance_weights_sum_to_one() {
        assert_relative_eq!(
            grayscale_rgb(1.0, 1.0, 1.0, GrayscaleMode::Luminance),
            1.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_modes() {
        assert_relative_eq!(grayscale_rgb(0.0, 3.0, 0.0, GrayscaleMode::Average), 1.0);
        assert_eq!(grayscale_rgb(0.1, 0.9, 0.4, GrayscaleMode::Maximum), 0.9);
        assert_relative_eq!(grayscale_rgb(3.0, 4.0, 0.0, GrayscaleMode::Magnitude), 5.0);
    }
}

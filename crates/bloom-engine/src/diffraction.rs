//! Far-field diffraction pattern of an aperture.
//!
//! The pattern is the magnitude of the aperture's 2-D Fourier transform,
//! quadrant-shifted so the DC term sits at the image center, then
//! log-compressed against the peak magnitude so the enormous dynamic range
//! fits a displayable `[0, 1]`. Runs synchronously; large apertures finish
//! in well under a second, so this pass has no engine machinery around it.

use bloom_core::{Error, PixelBuffer, Result};
use bloom_math::fft::{shift_index, Fft2d};
use bloom_math::{grayscale_rgb, GrayscaleMode, EPSILON};
use num_complex::Complex;
use tracing::debug;

/// Log compression constant. Chosen so typical aperture transforms fill
/// the displayable range without crushing the faint outer rings.
pub const CONTRAST_CONSTANT: f32 = 0.0002187;

/// Computes the diffraction pattern of `aperture`.
///
/// With `grayscale` the aperture is collapsed to luminance and the pattern
/// is replicated across RGB; otherwise each channel is transformed
/// independently. Output dimensions are the aperture's, rounded up to
/// even. Apertures smaller than 4x4 are rejected.
pub fn diffraction_pattern(aperture: &PixelBuffer, grayscale: bool) -> Result<PixelBuffer> {
    let (w, h) = aperture.dimensions();
    if w < 4 || h < 4 {
        return Err(Error::config(format!(
            "aperture must be at least 4x4 pixels, got {w}x{h}"
        )));
    }
    let pw = (w + w % 2) as usize;
    let ph = (h + h % 2) as usize;
    debug!(width = w, height = h, grayscale, "computing diffraction pattern");

    let mut fft = Fft2d::new();
    let mut out = PixelBuffer::new(pw as u32, ph as u32);
    let channels: &[usize] = if grayscale { &[0] } else { &[0, 1, 2] };

    for &ch in channels {
        let mut signal = vec![Complex::new(0.0f32, 0.0); pw * ph];
        for y in 0..h {
            for x in 0..w {
                let idx = aperture.offset(x, y);
                let px = &aperture.data()[idx..idx + 3];
                let v = if grayscale {
                    grayscale_rgb(px[0], px[1], px[2], GrayscaleMode::Luminance)
                } else {
                    px[ch]
                };
                signal[y as usize * pw + x as usize] = Complex::new(v, 0.0);
            }
        }
        fft.forward(&mut signal, pw, ph);

        let magnitudes: Vec<f32> = signal.iter().map(|c| c.norm()).collect();
        let max_mag = magnitudes.iter().copied().fold(0.0f32, f32::max);
        let log_max = (CONTRAST_CONSTANT * max_mag + 1.0).ln();

        for y in 0..ph {
            for x in 0..pw {
                // Quadrant shift: DC lands at the image center.
                let sx = shift_index(x, pw / 2, pw);
                let sy = shift_index(y, ph / 2, ph);
                let mag = magnitudes[sy * pw + sx];
                let v = if log_max > EPSILON {
                    (CONTRAST_CONSTANT * mag + 1.0).ln() / log_max
                } else {
                    0.0
                };
                let idx = out.offset(x as u32, y as u32);
                if grayscale {
                    out.data_mut()[idx..idx + 3].copy_from_slice(&[v, v, v]);
                } else {
                    out.data_mut()[idx + ch] = v;
                }
            }
        }
    }
    Ok(out)
}

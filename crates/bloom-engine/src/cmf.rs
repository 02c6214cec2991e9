//! Wavelength-response (color matching function) tables.
//!
//! Dispersion weighs each wavelength step by the eye's response at that
//! wavelength. The built-in table is derived from the multi-lobe Gaussian
//! fit of the CIE 1931 standard observer, converted to linear sRGB with
//! negative lobes clamped. Callers with measured data can supply their own
//! rows via [`CmfTable::from_rows`].

use bloom_core::{Error, Result};
use bloom_math::{grayscale_rgb, lerp, GrayscaleMode, EPSILON};

/// One table row: a wavelength and the linear sRGB response at it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CmfRow {
    /// Wavelength in nanometers.
    pub wavelength: f32,
    /// Linear sRGB response.
    pub rgb: [f32; 3],
}

/// A wavelength-response table over the visible spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct CmfTable {
    rows: Vec<CmfRow>,
}

impl CmfTable {
    /// Builds a table from explicit rows.
    ///
    /// Requires at least two rows with strictly increasing wavelengths.
    pub fn from_rows(rows: Vec<CmfRow>) -> Result<Self> {
        if rows.len() < 2 {
            return Err(Error::config("CMF table needs at least two rows"));
        }
        if rows.windows(2).any(|w| w[1].wavelength <= w[0].wavelength) {
            return Err(Error::config(
                "CMF table wavelengths must be strictly increasing",
            ));
        }
        Ok(Self { rows })
    }

    /// The built-in CIE-1931-derived table, 380-730 nm in 5 nm steps.
    pub fn builtin() -> Self {
        let rows = (0..=70)
            .map(|i| {
                let wavelength = 380.0 + i as f32 * 5.0;
                CmfRow {
                    wavelength,
                    rgb: xyz_to_srgb(cie_xyz(wavelength)),
                }
            })
            .collect();
        Self { rows }
    }

    /// Wavelength span covered by the table, in nanometers.
    pub fn range(&self) -> (f32, f32) {
        (
            self.rows[0].wavelength,
            self.rows[self.rows.len() - 1].wavelength,
        )
    }

    /// Samples `count` evenly spaced wavelengths across the table's range.
    ///
    /// Samples are globally normalized so their luminances sum to 1:
    /// accumulating all steps reproduces the input's overall brightness. A
    /// single sample sits at the spectral midpoint.
    pub fn sample(&self, count: u32) -> Result<Vec<[f32; 3]>> {
        if count == 0 {
            return Err(Error::config("sample count must be at least 1"));
        }
        let (lo, hi) = self.range();
        let mut samples: Vec<[f32; 3]> = (0..count)
            .map(|i| {
                let t = if count == 1 {
                    0.5
                } else {
                    i as f32 / (count - 1) as f32
                };
                self.interpolate(lerp(lo, hi, t))
            })
            .collect();

        let total: f32 = samples
            .iter()
            .map(|s| grayscale_rgb(s[0], s[1], s[2], GrayscaleMode::Luminance))
            .sum();
        if total > EPSILON {
            let inv = 1.0 / total;
            for s in &mut samples {
                s[0] *= inv;
                s[1] *= inv;
                s[2] *= inv;
            }
        }
        Ok(samples)
    }

    /// Like [`Self::sample`] but flattened to `count * 3` floats for the
    /// wire protocol.
    pub fn sample_flat(&self, count: u32) -> Result<Vec<f32>> {
        Ok(self.sample(count)?.into_iter().flatten().collect())
    }

    fn interpolate(&self, wavelength: f32) -> [f32; 3] {
        let hi = self
            .rows
            .partition_point(|row| row.wavelength < wavelength)
            .clamp(1, self.rows.len() - 1);
        let a = self.rows[hi - 1];
        let b = self.rows[hi];
        let t = ((wavelength - a.wavelength) / (b.wavelength - a.wavelength)).clamp(0.0, 1.0);
        [
            lerp(a.rgb[0], b.rgb[0], t),
            lerp(a.rgb[1], b.rgb[1], t),
            lerp(a.rgb[2], b.rgb[2], t),
        ]
    }
}

impl Default for CmfTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Piecewise Gaussian with independent left/right widths.
fn lobe(x: f32, mu: f32, sigma_l: f32, sigma_r: f32) -> f32 {
    let sigma = if x < mu { sigma_l } else { sigma_r };
    let d = (x - mu) / sigma;
    (-0.5 * d * d).exp()
}

/// Multi-lobe Gaussian fit of the CIE 1931 2-degree observer.
fn cie_xyz(wavelength: f32) -> [f32; 3] {
    let x = 1.056 * lobe(wavelength, 599.8, 37.9, 31.0)
        + 0.362 * lobe(wavelength, 442.0, 16.0, 26.7)
        - 0.065 * lobe(wavelength, 501.1, 20.4, 26.2);
    let y = 0.821 * lobe(wavelength, 568.8, 46.9, 40.5)
        + 0.286 * lobe(wavelength, 530.9, 16.3, 31.1);
    let z = 1.217 * lobe(wavelength, 437.0, 11.8, 36.0)
        + 0.681 * lobe(wavelength, 459.0, 26.0, 13.8);
    [x, y, z]
}

/// XYZ to linear sRGB, negative lobes clamped to zero.
fn xyz_to_srgb([x, y, z]: [f32; 3]) -> [f32; 3] {
    [
        (3.2406 * x - 1.5372 * y - 0.4986 * z).max(0.0),
        (-0.9689 * x + 1.8758 * y + 0.0415 * z).max(0.0),
        (0.0557 * x - 0.2040 * y + 1.0570 * z).max(0.0),
    ]
}

//! Command implementations and shared I/O helpers.

pub mod convolve;
pub mod diffract;
pub mod disperse;

use anyhow::{bail, Context, Result};
use bloom_core::PixelBuffer;
use bloom_engine::{Phase, RunStatus};
use std::path::Path;
use std::time::Duration;

/// Loads any supported image as an RGBA32F buffer.
pub fn load_image(path: &Path) -> Result<PixelBuffer> {
    let img = image::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .into_rgba32f();
    let (w, h) = img.dimensions();
    PixelBuffer::from_vec(w, h, img.into_raw())
        .with_context(|| format!("{} has no pixels", path.display()))
}

/// Saves a buffer: EXR keeps full float range, anything else is clamped
/// to 8-bit.
pub fn save_image(path: &Path, buffer: &PixelBuffer) -> Result<()> {
    let (w, h) = buffer.dimensions();
    let is_exr = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("exr"));

    if is_exr {
        let img = image::Rgba32FImage::from_raw(w, h, buffer.data().to_vec())
            .context("buffer length mismatch")?;
        image::DynamicImage::ImageRgba32F(img)
            .save(path)
            .with_context(|| format!("failed to save {}", path.display()))?;
    } else {
        let bytes: Vec<u8> = buffer
            .data()
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        let img = image::RgbaImage::from_raw(w, h, bytes).context("buffer length mismatch")?;
        img.save(path)
            .with_context(|| format!("failed to save {}", path.display()))?;
    }
    Ok(())
}

/// Polls an engine's status until it leaves `Working`, printing progress
/// to stderr. Fails on the `Failed` phase with the engine's error.
pub fn wait_for_engine(status: impl Fn() -> RunStatus, verbose: bool) -> Result<()> {
    loop {
        let s = status();
        match s.phase {
            Phase::Working => {
                if verbose {
                    eprint!("\r{}        ", s.progress);
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Phase::Done => {
                if verbose {
                    eprintln!("\rdone                    ");
                }
                return Ok(());
            }
            Phase::Failed => {
                if verbose {
                    eprintln!();
                }
                bail!(s.error.unwrap_or_else(|| "unknown engine failure".into()));
            }
            Phase::Idle => bail!("run was canceled"),
        }
    }
}

/// Zero means "use every core".
pub fn resolve_threads(threads: u32) -> u32 {
    if threads == 0 {
        bloom_engine::params::default_threads()
    } else {
        threads
    }
}

//! Diffract command.
//!
//! Synchronous; no engine machinery needed.

use crate::DiffractArgs;
use anyhow::Result;
use bloom_engine::diffraction_pattern;
use tracing::info;

pub fn run(args: DiffractArgs, verbose: bool) -> Result<()> {
    let aperture = super::load_image(&args.input)?;
    info!(input = %args.input.display(), grayscale = args.grayscale, "diffract");

    let pattern = diffraction_pattern(&aperture, args.grayscale)?;
    super::save_image(&args.output, &pattern)?;
    if verbose {
        println!("wrote {}", args.output.display());
    }
    Ok(())
}

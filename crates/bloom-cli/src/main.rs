//! lumenbloom - optical bloom simulation CLI
//!
//! Convolution bloom, chromatic dispersion, and diffraction patterns for
//! HDR images.

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "lumenbloom")]
#[command(author, version, about = "Optical bloom simulation for HDR images")]
#[command(long_about = "
Physically motivated bloom effects driven by convolution, chromatic
dispersion, and aperture diffraction.

Examples:
  lumenbloom convolve scene.exr kernel.exr -o bloomed.exr
  lumenbloom convolve scene.exr kernel.exr -o out.exr --backend cpu --threshold 1.5 --knee 1
  lumenbloom convolve scene.exr kernel.exr -o out.exr --backend worker --worker-exe ./bloom-worker
  lumenbloom disperse kernel.exr -o dispersed.exr --amount 0.4 --steps 32
  lumenbloom diffract aperture.png -o pattern.exr --grayscale
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convolve an image with a bloom kernel
    #[command(visible_alias = "conv")]
    Convolve(ConvolveArgs),

    /// Apply chromatic dispersion
    #[command(visible_alias = "disp")]
    Disperse(DisperseArgs),

    /// Compute the diffraction pattern of an aperture
    #[command(visible_alias = "diff")]
    Diffract(DiffractArgs),
}

/// Convolution backend choice on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConvBackendArg {
    /// Frequency-domain convolution (default, fastest for large kernels)
    Fft,
    /// Direct splatting on CPU threads
    Cpu,
    /// Direct splatting in the external worker process
    Worker,
}

/// Dispersion backend choice on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DispBackendArg {
    /// Wavelength steps on CPU threads
    Cpu,
    /// External worker process
    Worker,
}

#[derive(Args)]
struct ConvolveArgs {
    /// Input image
    input: PathBuf,

    /// Kernel image
    kernel: PathBuf,

    /// Output image
    #[arg(short, long)]
    output: PathBuf,

    /// Backend to run
    #[arg(short, long, value_enum, default_value_t = ConvBackendArg::Fft)]
    backend: ConvBackendArg,

    /// Luminance threshold; dimmer pixels contribute nothing
    #[arg(short, long, default_value = "0.0")]
    threshold: f32,

    /// Soft knee above the threshold
    #[arg(short, long, default_value = "0.0")]
    knee: f32,

    /// Kernel exposure in stops
    #[arg(long, default_value = "0.0")]
    exposure: f32,

    /// Kernel contrast (-1..1)
    #[arg(long, default_value = "0.0")]
    contrast: f32,

    /// Kernel scale factor (applied to both axes)
    #[arg(long, default_value = "1.0")]
    scale: f32,

    /// Kernel rotation in degrees
    #[arg(long, default_value = "0.0")]
    rotation: f32,

    /// Kernel crop fraction (0..1]
    #[arg(long, default_value = "1.0")]
    crop: f32,

    /// Normalized kernel center X
    #[arg(long, default_value = "0.5")]
    center_x: f32,

    /// Normalized kernel center Y
    #[arg(long, default_value = "0.5")]
    center_y: f32,

    /// Disable kernel auto-exposure
    #[arg(long)]
    no_auto_exposure: bool,

    /// Deconvolve instead of convolve (FFT backend only)
    #[arg(long)]
    deconvolve: bool,

    /// Threads for the CPU backend (0 = auto)
    #[arg(short = 'j', long, default_value = "0")]
    threads: u32,

    /// Progress chunks for the worker backend
    #[arg(long, default_value = "10")]
    chunks: u32,

    /// Path to the worker executable
    #[arg(long)]
    worker_exe: Option<PathBuf>,

    /// Mix the layers by --blend-mix instead of adding them
    #[arg(long)]
    blend_mixed: bool,

    /// Input layer weight (additive blend)
    #[arg(long, default_value = "1.0")]
    blend_input: f32,

    /// Convolution layer weight (additive blend)
    #[arg(long, default_value = "1.0")]
    blend_conv: f32,

    /// Mix factor (non-additive blend)
    #[arg(long, default_value = "0.2")]
    blend_mix: f32,

    /// Convolution layer exposure in stops
    #[arg(long, default_value = "0.0")]
    blend_exposure: f32,

    /// Print the resource estimate and exit without running
    #[arg(long)]
    estimate: bool,
}

#[derive(Args)]
struct DisperseArgs {
    /// Input image
    input: PathBuf,

    /// Output image
    #[arg(short, long)]
    output: PathBuf,

    /// Dispersion amount (0..1)
    #[arg(short, long, default_value = "0.4")]
    amount: f32,

    /// Number of wavelength steps
    #[arg(short, long, default_value = "32")]
    steps: u32,

    /// Backend to run
    #[arg(short, long, value_enum, default_value_t = DispBackendArg::Cpu)]
    backend: DispBackendArg,

    /// Input exposure in stops
    #[arg(long, default_value = "0.0")]
    exposure: f32,

    /// Input contrast (-1..1)
    #[arg(long, default_value = "0.0")]
    contrast: f32,

    /// Threads for the CPU backend (0 = auto)
    #[arg(short = 'j', long, default_value = "0")]
    threads: u32,

    /// Path to the worker executable
    #[arg(long)]
    worker_exe: Option<PathBuf>,
}

#[derive(Args)]
struct DiffractArgs {
    /// Aperture image
    input: PathBuf,

    /// Output image
    #[arg(short, long)]
    output: PathBuf,

    /// Collapse the aperture to luminance first
    #[arg(short, long)]
    grayscale: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose { "info" } else { "warn" })
            }),
        )
        .init();

    match cli.command {
        Commands::Convolve(args) => commands::convolve::run(args, cli.verbose),
        Commands::Disperse(args) => commands::disperse::run(args, cli.verbose),
        Commands::Diffract(args) => commands::diffract::run(args, cli.verbose),
    }
}

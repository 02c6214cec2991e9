//! Convolve command.
//!
//! Loads the input and kernel, runs the selected backend, and saves the
//! blended result.

use crate::{ConvBackendArg, ConvolveArgs};
use anyhow::Result;
use bloom_engine::{
    BlendParams, ConvolutionBackend, ConvolutionEngine, ConvolutionParams, KernelParams,
};
use tracing::info;

pub fn run(args: ConvolveArgs, verbose: bool) -> Result<()> {
    let input = super::load_image(&args.input)?;
    let kernel = super::load_image(&args.kernel)?;
    info!(
        input = %args.input.display(),
        kernel = %args.kernel.display(),
        backend = ?args.backend,
        "convolve"
    );

    let engine = ConvolutionEngine::default();
    engine.images().input.store(&input);
    engine.images().kernel.store(&kernel);

    let params = ConvolutionParams {
        backend: match args.backend {
            ConvBackendArg::Fft => ConvolutionBackend::Fft,
            ConvBackendArg::Cpu => ConvolutionBackend::NaiveCpu,
            ConvBackendArg::Worker => ConvolutionBackend::NaiveWorker,
        },
        kernel: KernelParams {
            exposure: args.exposure,
            contrast: args.contrast,
            scale: [args.scale, args.scale],
            rotation: args.rotation,
            crop: [args.crop, args.crop],
            center: [args.center_x, args.center_y],
            auto_exposure: !args.no_auto_exposure,
            ..Default::default()
        },
        threshold: args.threshold,
        knee: args.knee,
        threads: super::resolve_threads(args.threads),
        chunks: args.chunks,
        deconvolve: args.deconvolve,
        worker_exe: args.worker_exe.clone(),
        blend: BlendParams {
            additive: !args.blend_mixed,
            input_weight: args.blend_input,
            conv_weight: args.blend_conv,
            mix: args.blend_mix,
            exposure: args.blend_exposure,
        },
        ..Default::default()
    };

    if args.estimate {
        println!("{}", engine.resource_estimate(&params));
        return Ok(());
    }
    if verbose {
        println!("estimated usage: {}", engine.resource_estimate(&params));
    }

    engine.convolve(params);
    super::wait_for_engine(|| engine.status(), verbose)?;

    let result = engine.images().preview.snapshot();
    super::save_image(&args.output, &result)?;
    if verbose {
        println!("wrote {}", args.output.display());
    }
    Ok(())
}

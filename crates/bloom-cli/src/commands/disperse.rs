//! Disperse command.

use crate::{DispBackendArg, DisperseArgs};
use anyhow::Result;
use bloom_engine::{DispersionBackend, DispersionEngine, DispersionParams};
use tracing::info;

pub fn run(args: DisperseArgs, verbose: bool) -> Result<()> {
    let input = super::load_image(&args.input)?;
    info!(
        input = %args.input.display(),
        amount = args.amount,
        steps = args.steps,
        "disperse"
    );

    let engine = DispersionEngine::default();
    engine.images().input.store(&input);

    engine.disperse(DispersionParams {
        backend: match args.backend {
            DispBackendArg::Cpu => DispersionBackend::Cpu,
            DispBackendArg::Worker => DispersionBackend::Worker,
        },
        amount: args.amount,
        steps: args.steps,
        exposure: args.exposure,
        contrast: args.contrast,
        threads: super::resolve_threads(args.threads),
        worker_exe: args.worker_exe.clone(),
        ..Default::default()
    });
    super::wait_for_engine(|| engine.status(), verbose)?;

    let result = engine.images().preview.snapshot();
    super::save_image(&args.output, &result)?;
    if verbose {
        println!("wrote {}", args.output.display());
    }
    Ok(())
}

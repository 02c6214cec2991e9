//! External worker executable.
//!
//! Invoked as `bloom-worker <request-path>`. Reads one tagged request,
//! performs the operation in chunks, publishes status snapshots at
//! `<request-path>stat` (always via write-temp-then-rename, so a reader
//! never sees a partial snapshot), and writes exactly one response at
//! `<request-path>out` the same way. Operation failures are reported
//! inside the response with `status = 0`; only an unreadable request makes
//! the process exit without responding.

use anyhow::{bail, Context};
use bloom_engine::conv::naive::{splat_pixel, RasterView};
use bloom_engine::dispersion::{accumulate_step, scale_for_step};
use bloom_math::transform_knee;
use bloom_proto::{
    BinaryMessage, ConvNaiveRequest, ConvNaiveResponse, ConvNaiveStat, DispersionRequest,
    DispersionResponse, OpKind,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run() {
        error!("worker failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let request_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: bloom-worker <request-path>")?;
    let stat_path = sibling(&request_path, "stat");
    let response_path = sibling(&request_path, "out");

    let file = File::open(&request_path)
        .with_context(|| format!("opening request {}", request_path.display()))?;
    let mut reader = BufReader::new(file);
    let op = OpKind::read_tag(&mut reader).context("reading operation tag")?;
    info!(?op, request = %request_path.display(), "worker started");

    match op {
        OpKind::ConvNaive => {
            let request =
                ConvNaiveRequest::read_from(&mut reader).context("decoding request")?;
            let result = run_conv(&request, &stat_path);
            let response = match result {
                Ok(buffer) => ConvNaiveResponse {
                    status: 1,
                    error: String::new(),
                    buffer,
                },
                Err(e) => ConvNaiveResponse {
                    status: 0,
                    error: format!("{e:#}"),
                    buffer: Vec::new(),
                },
            };
            write_atomic(&response_path, &response)?;
        }
        OpKind::Dispersion => {
            let request =
                DispersionRequest::read_from(&mut reader).context("decoding request")?;
            // Liveness marker: dispersion has no mid-run snapshots.
            File::create(&stat_path).context("creating stat file")?;
            let result = run_dispersion(&request);
            let response = match result {
                Ok(buffer) => DispersionResponse {
                    status: 1,
                    error: String::new(),
                    buffer,
                },
                Err(e) => DispersionResponse {
                    status: 0,
                    error: format!("{e:#}"),
                    buffer: Vec::new(),
                },
            };
            write_atomic(&response_path, &response)?;
        }
    }
    info!("worker finished");
    Ok(())
}

/// Chunked naive convolution with per-chunk status snapshots.
fn run_conv(req: &ConvNaiveRequest, stat_path: &Path) -> anyhow::Result<Vec<f32>> {
    let (iw, ih) = (req.input_width, req.input_height);
    let pixel_count = iw as usize * ih as usize;
    if iw == 0 || ih == 0 || req.input_buffer.len() != pixel_count * 4 {
        bail!("input buffer does not match {iw}x{ih}");
    }
    let kernel_count = req.kernel_width as usize * req.kernel_height as usize;
    if req.kernel_width == 0 || req.kernel_height == 0 || req.kernel_buffer.len() != kernel_count * 4
    {
        bail!(
            "kernel buffer does not match {}x{}",
            req.kernel_width,
            req.kernel_height
        );
    }

    let input = RasterView {
        width: iw,
        height: ih,
        data: &req.input_buffer,
    };
    let kernel = RasterView {
        width: req.kernel_width,
        height: req.kernel_height,
        data: &req.kernel_buffer,
    };
    let center = (
        ((req.kernel_center_x.clamp(0.0, 1.0) * req.kernel_width as f32).floor() as u32)
            .min(req.kernel_width - 1),
        ((req.kernel_center_y.clamp(0.0, 1.0) * req.kernel_height as f32).floor() as u32)
            .min(req.kernel_height - 1),
    );
    let knee_width = transform_knee(req.knee);

    let chunks = req.num_chunks.max(1) as usize;
    let chunk_size = pixel_count.div_ceil(chunks);
    debug!(chunks, chunk_size, "convolving");

    // First snapshot doubles as the liveness marker.
    write_atomic(
        stat_path,
        &ConvNaiveStat {
            chunks_done: 0,
            buffer: Vec::new(),
        },
    )?;

    let mut acc = vec![0.0f32; pixel_count * 4];
    for chunk in 0..chunks {
        let start = chunk * chunk_size;
        let end = (start + chunk_size).min(pixel_count);
        for index in start..end {
            splat_pixel(
                &mut acc, &input, &kernel, center, req.threshold, knee_width, index,
            );
        }

        write_atomic(
            stat_path,
            &ConvNaiveStat {
                chunks_done: chunk as u32 + 1,
                buffer: finalize(&acc, req.conv_multiplier),
            },
        )?;
        if req.chunk_sleep_ms > 0 && chunk + 1 < chunks {
            std::thread::sleep(Duration::from_millis(req.chunk_sleep_ms as u64));
        }
    }
    Ok(finalize(&acc, req.conv_multiplier))
}

/// Wavelength-stepped dispersion, accumulated in one pass.
fn run_dispersion(req: &DispersionRequest) -> anyhow::Result<Vec<f32>> {
    let (w, h) = (req.input_width, req.input_height);
    let pixel_count = w as usize * h as usize;
    if w == 0 || h == 0 || req.input_buffer.len() != pixel_count * 4 {
        bail!("input buffer does not match {w}x{h}");
    }
    let steps = req.steps.max(1);
    if req.cmf_samples.len() != steps as usize * 3 {
        bail!(
            "expected {} CMF samples, got {}",
            steps * 3,
            req.cmf_samples.len()
        );
    }

    let input = RasterView {
        width: w,
        height: h,
        data: &req.input_buffer,
    };
    let amount = req.amount.clamp(0.0, 1.0);
    debug!(steps, amount, "dispersing");

    let mut acc = vec![0.0f32; pixel_count * 4];
    for step in 0..steps {
        let sample = &req.cmf_samples[step as usize * 3..step as usize * 3 + 3];
        let scale = scale_for_step(amount, step, steps);
        accumulate_step(&mut acc, &input, scale, [sample[0], sample[1], sample[2]]);
    }
    for px in acc.chunks_exact_mut(4) {
        px[3] = 1.0;
    }
    Ok(acc)
}

/// Scales an accumulator into a display-ready buffer.
fn finalize(acc: &[f32], multiplier: f32) -> Vec<f32> {
    let mut out = acc.to_vec();
    for px in out.chunks_exact_mut(4) {
        px[0] = (px[0] * multiplier).max(0.0);
        px[1] = (px[1] * multiplier).max(0.0);
        px[2] = (px[2] * multiplier).max(0.0);
        px[3] = 1.0;
    }
    out
}

/// Writes a message to a temp file next to `path` and renames it into
/// place, so readers only ever see complete files.
fn write_atomic<M: BinaryMessage>(path: &Path, message: &M) -> anyhow::Result<()> {
    let tmp = sibling(path, ".tmp");
    {
        let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        message.write_to(&mut writer)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming snapshot into {}", path.display()))?;
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

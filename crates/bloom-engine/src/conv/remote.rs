//! Worker-process convolution backend.
//!
//! Serializes a [`ConvNaiveRequest`], spawns the worker executable through
//! [`WorkerProcess`], mirrors its status snapshots into the shared preview
//! exactly like the CPU path does, and decodes the single response. The
//! worker's own failures arrive inside the response message and surface as
//! process faults.

use super::{ConvContext, ConvolveBackend};
use crate::params::CONV_MULTIPLIER;
use crate::state::Progress;
use crate::worker::WorkerProcess;
use bloom_core::{Error, PixelBuffer, Result};
use bloom_proto::{BinaryMessage, ConvNaiveRequest, ConvNaiveResponse, ConvNaiveStat, OpKind};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use tracing::{debug, trace};

/// Convolution backend that delegates to the external worker executable.
pub struct RemoteBackend;

impl ConvolveBackend for RemoteBackend {
    fn run(&mut self, ctx: &ConvContext<'_>) -> Result<PixelBuffer> {
        let exe = ctx.params.worker_exe.as_deref().ok_or_else(|| {
            Error::config("worker backend selected but no worker executable configured")
        })?;

        let (iw, ih) = ctx.input.dimensions();
        let (kw, kh) = ctx.kernel.dimensions();
        let num_chunks = ctx.params.chunks.max(1);

        let mut process = WorkerProcess::prepare()?;
        let request = ConvNaiveRequest {
            stat_lock_name: process
                .stat_path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            num_chunks,
            chunk_sleep_ms: ctx.params.chunk_sleep_ms,
            kernel_center_x: ctx.params.kernel.center[0],
            kernel_center_y: ctx.params.kernel.center[1],
            threshold: ctx.params.threshold,
            knee: ctx.params.knee,
            conv_multiplier: CONV_MULTIPLIER,
            input_width: iw,
            input_height: ih,
            kernel_width: kw,
            kernel_height: kh,
            input_buffer: ctx.input.data().to_vec(),
            kernel_buffer: ctx.kernel.data().to_vec(),
        };

        {
            let file = File::create(process.request_path())?;
            let mut writer = BufWriter::new(file);
            OpKind::ConvNaive.write_tag(&mut writer).map_err(Error::from)?;
            request.write_to(&mut writer).map_err(Error::from)?;
            writer.flush()?;
        }
        debug!(chunks = num_chunks, "delegating convolution to worker");

        process.spawn(exe)?;
        process.drive(ctx.state, |stat_path| {
            let Ok(file) = File::open(stat_path) else {
                return;
            };
            // A snapshot that fails to decode is simply skipped; the next
            // one will be complete (the worker renames them into place).
            if let Ok(stat) = ConvNaiveStat::read_from(&mut BufReader::new(file)) {
                trace!(chunks_done = stat.chunks_done, "worker status");
                ctx.state.set_progress(Progress::Chunks {
                    done: stat.chunks_done,
                    total: num_chunks,
                });
                if let Some(buffer) = PixelBuffer::from_vec(iw, ih, stat.buffer) {
                    ctx.preview.replace(buffer);
                }
            }
        })?;

        let file = File::open(process.response_path())?;
        let response =
            ConvNaiveResponse::read_from(&mut BufReader::new(file)).map_err(Error::from)?;
        if response.status != 1 {
            return Err(Error::process(format!(
                "worker reported failure: {}",
                response.error
            )));
        }
        PixelBuffer::from_vec(iw, ih, response.buffer)
            .ok_or_else(|| Error::stream("worker response buffer does not match input dimensions"))
    }
}

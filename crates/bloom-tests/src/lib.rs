//! Integration tests for the lumenbloom crates.
//!
//! End-to-end checks that cross crate boundaries: backend agreement,
//! engine lifecycle, and the binary protocol over real files. Tests that
//! need the compiled worker executable live in `bloom-worker/tests`.

#[cfg(test)]
mod tests {
    use bloom_core::PixelBuffer;
    use bloom_engine::{
        BlendParams, ConvolutionBackend, ConvolutionEngine, ConvolutionParams, KernelParams,
        Phase,
    };
    use bloom_proto::{BinaryMessage, ConvNaiveRequest, OpKind};
    use std::fs::File;
    use std::io::{BufReader, BufWriter, Write};
    use tempfile::tempdir;

    fn impulse_input(w: u32, h: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h);
        let idx = buf.offset(w / 2, h / 2);
        buf.data_mut()[idx..idx + 3].copy_from_slice(&[2048.0, 1024.0, 512.0]);
        buf
    }

    /// Radially symmetric kernel with a soft falloff.
    fn symmetric_kernel(size: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(size, size);
        let c = size as f32 / 2.0 - 0.5;
        for y in 0..size {
            for x in 0..size {
                let d2 = (x as f32 - c).powi(2) + (y as f32 - c).powi(2);
                let v = (-d2 / (size as f32)).exp();
                let idx = buf.offset(x, y);
                buf.data_mut()[idx..idx + 3].copy_from_slice(&[v, v, v]);
            }
        }
        buf
    }

    fn run_backend(backend: ConvolutionBackend) -> PixelBuffer {
        let engine = ConvolutionEngine::default();
        engine.images().input.store(&impulse_input(32, 32));
        engine.images().kernel.store(&symmetric_kernel(9));
        engine.convolve(ConvolutionParams {
            backend,
            kernel: KernelParams {
                auto_exposure: false,
                ..Default::default()
            },
            threads: 3,
            ..Default::default()
        });
        engine.wait();

        let status = engine.status();
        assert_eq!(status.phase, Phase::Done, "error: {:?}", status.error);
        engine.images().output.snapshot()
    }

    #[test]
    fn test_fft_and_naive_backends_agree() {
        let fft = run_backend(ConvolutionBackend::Fft);
        let naive = run_backend(ConvolutionBackend::NaiveCpu);

        assert_eq!(fft.dimensions(), naive.dimensions());
        let mut max_diff = 0.0f32;
        for (a, b) in fft.data().iter().zip(naive.data().iter()) {
            max_diff = max_diff.max((a - b).abs());
        }
        // Peak output value is about 2, so this is a tight bound.
        assert!(max_diff < 1e-2, "max difference {max_diff}");
    }

    #[test]
    fn test_cancel_lands_idle_and_relaunch_succeeds() {
        let engine = ConvolutionEngine::default();
        let mut input = PixelBuffer::new(192, 192);
        input.fill([1.0, 1.0, 1.0, 1.0]);
        engine.images().input.store(&input);
        engine.images().kernel.store(&symmetric_kernel(64));

        engine.convolve(ConvolutionParams {
            backend: ConvolutionBackend::NaiveCpu,
            threads: 1,
            ..Default::default()
        });
        engine.cancel();

        let status = engine.status();
        assert_eq!(status.phase, Phase::Idle);
        assert!(status.error.is_none());

        engine.images().input.store(&impulse_input(16, 16));
        engine.images().kernel.store(&symmetric_kernel(3));
        engine.convolve(ConvolutionParams {
            backend: ConvolutionBackend::Fft,
            ..Default::default()
        });
        engine.wait();
        assert_eq!(engine.status().phase, Phase::Done);
    }

    #[test]
    fn test_unreachable_worker_exe_is_a_process_fault() {
        let engine = ConvolutionEngine::default();
        engine.images().input.store(&impulse_input(8, 8));
        engine.images().kernel.store(&symmetric_kernel(3));

        let started = std::time::Instant::now();
        engine.convolve(ConvolutionParams {
            backend: ConvolutionBackend::NaiveWorker,
            worker_exe: Some("/nonexistent/bloom-worker".into()),
            ..Default::default()
        });
        engine.wait();

        let status = engine.status();
        assert_eq!(status.phase, Phase::Failed);
        assert!(
            status.error.as_deref().unwrap().contains("worker"),
            "error: {:?}",
            status.error
        );
        // Spawn failure surfaces immediately, well inside the startup
        // timeout.
        assert!(started.elapsed().as_millis() < 5000);
    }

    #[test]
    fn test_request_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("request");

        let request = ConvNaiveRequest {
            stat_lock_name: "requeststat".into(),
            num_chunks: 4,
            chunk_sleep_ms: 0,
            kernel_center_x: 0.5,
            kernel_center_y: 0.5,
            threshold: 0.25,
            knee: 1.0,
            conv_multiplier: 1.0 / 1024.0,
            input_width: 2,
            input_height: 2,
            kernel_width: 1,
            kernel_height: 1,
            input_buffer: vec![0.5; 16],
            kernel_buffer: vec![1.0; 4],
        };
        {
            let mut writer = BufWriter::new(File::create(&path).unwrap());
            OpKind::ConvNaive.write_tag(&mut writer).unwrap();
            request.write_to(&mut writer).unwrap();
            writer.flush().unwrap();
        }

        let mut reader = BufReader::new(File::open(&path).unwrap());
        assert_eq!(OpKind::read_tag(&mut reader).unwrap(), OpKind::ConvNaive);
        let decoded = ConvNaiveRequest::read_from(&mut reader).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_reblend_after_run_changes_preview() {
        let engine = ConvolutionEngine::default();
        engine.images().input.store(&impulse_input(16, 16));
        engine.images().kernel.store(&symmetric_kernel(5));
        engine.convolve(ConvolutionParams::default());
        engine.wait();
        assert_eq!(engine.status().phase, Phase::Done);

        let conv_only = engine
            .blend(&BlendParams {
                additive: true,
                input_weight: 0.0,
                conv_weight: 1.0,
                ..Default::default()
            })
            .unwrap();
        let boosted = engine
            .blend(&BlendParams {
                additive: true,
                input_weight: 0.0,
                conv_weight: 1.0,
                exposure: 2.0,
                ..Default::default()
            })
            .unwrap();

        let idx = conv_only.offset(8, 8);
        assert!(boosted.data()[idx] > conv_only.data()[idx]);
        // The preview slot follows the latest blend.
        assert_eq!(engine.images().preview.snapshot(), boosted);
    }
}

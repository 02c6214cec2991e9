//! Worker process lifecycle.
//!
//! A run that delegates to the external worker executable goes through one
//! [`WorkerProcess`]: a uniquely named temp directory holds the request
//! file, the worker's response at `<request>out`, and its periodic status
//! snapshots at `<request>stat`. The request is fully written before the
//! process is spawned, so the worker never observes a partial file.
//!
//! The orchestrator gives the worker a bounded window to show a first sign
//! of life (status or response file); after that it polls the child every
//! few tens of milliseconds, surfacing status snapshots to the caller at
//! roughly 1 Hz. Cancellation kills the process. Cleanup always runs: the
//! child is killed if still alive and the temp directory is removed on
//! drop.

use crate::state::RunState;
use bloom_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, warn};

/// How long the worker gets to produce its first file before the run is
/// declared dead.
pub const STARTUP_TIMEOUT: Duration = Duration::from_millis(5000);

/// Child poll interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(30);

/// How often status snapshots are surfaced to the caller.
pub const STAT_INTERVAL: Duration = Duration::from_millis(1000);

/// One spawned worker run: temp files plus the child process handle.
#[derive(Debug)]
pub struct WorkerProcess {
    dir: TempDir,
    request_path: PathBuf,
    child: Option<Child>,
}

impl WorkerProcess {
    /// Allocates a fresh temp directory and request path. Nothing is
    /// spawned yet; the caller writes the request file first.
    pub fn prepare() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("lumenbloom-")
            .tempdir()
            .map_err(|e| Error::process(format!("failed to create worker directory: {e}")))?;
        let request_path = dir.path().join("request");
        Ok(Self {
            dir,
            request_path,
            child: None,
        })
    }

    /// Path the request file must be written to before [`Self::spawn`].
    pub fn request_path(&self) -> &Path {
        &self.request_path
    }

    /// Path the worker writes its response to.
    pub fn response_path(&self) -> PathBuf {
        sibling(&self.request_path, "out")
    }

    /// Path the worker writes status snapshots to.
    pub fn stat_path(&self) -> PathBuf {
        sibling(&self.request_path, "stat")
    }

    /// Spawns the worker with the request path as its sole argument.
    pub fn spawn(&mut self, exe: &Path) -> Result<()> {
        debug!(exe = %exe.display(), request = %self.request_path.display(), "spawning worker");
        let child = Command::new(exe)
            .arg(&self.request_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .current_dir(self.dir.path())
            .spawn()
            .map_err(|e| Error::process(format!("failed to spawn worker {:?}: {e}", exe)))?;
        self.child = Some(child);
        Ok(())
    }

    /// `true` while the child has not exited.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kills the child if still alive. Idempotent.
    pub fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(e) = child.kill() {
                    warn!("failed to kill worker: {e}");
                }
            }
            let _ = child.wait();
        }
        self.child = None;
    }

    /// Drives the spawned worker to completion.
    ///
    /// `on_stat` is invoked with the status file path roughly once per
    /// second while the worker runs. Returns once the response file exists,
    /// with [`Error::Canceled`] if the state's cancel flag fired (the child
    /// is killed first), or with [`Error::Process`] if the worker dies or
    /// goes silent without producing a response.
    pub fn drive(
        &mut self,
        state: &RunState,
        mut on_stat: impl FnMut(&Path),
    ) -> Result<()> {
        let response = self.response_path();
        let stat = self.stat_path();
        let started = Instant::now();
        let mut last_stat = Instant::now();
        let mut seen_output = false;

        loop {
            if state.cancel_requested() {
                self.kill();
                return Err(Error::Canceled);
            }
            if response.exists() {
                return Ok(());
            }

            if !seen_output {
                seen_output = stat.exists();
                if !seen_output && started.elapsed() > STARTUP_TIMEOUT {
                    self.kill();
                    return Err(Error::process(format!(
                        "worker produced no output within {} ms",
                        STARTUP_TIMEOUT.as_millis()
                    )));
                }
            } else if last_stat.elapsed() >= STAT_INTERVAL {
                last_stat = Instant::now();
                on_stat(&stat);
            }

            if !self.is_running() {
                // The child may have exited right after writing the
                // response; give the filesystem one more look.
                if response.exists() {
                    return Ok(());
                }
                return Err(Error::process("worker exited without a response"));
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

fn sibling(request: &Path, suffix: &str) -> PathBuf {
    let mut name = request.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

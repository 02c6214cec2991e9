//! Run-state machine shared between an engine and its caller.
//!
//! A run moves `Idle -> Working -> {Done, Failed}` with exactly one
//! terminal transition; cancellation returns the machine to `Idle` without
//! recording a failure. The cancel flag is an atomic read on the hot path
//! so compute loops can poll it per pixel.

use bloom_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Lifecycle phase of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No run in progress, no result pending.
    #[default]
    Idle,
    /// A background run is in progress.
    Working,
    /// The last run finished successfully.
    Done,
    /// The last run failed; see [`RunStatus::error`].
    Failed,
}

/// Progress report published by a running backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Progress {
    /// Nothing reported yet.
    #[default]
    None,
    /// Input pixels consumed out of the total (naive CPU convolution).
    Pixels {
        /// Pixels done.
        done: u64,
        /// Total pixels.
        total: u64,
    },
    /// Worker chunks finished out of the total.
    Chunks {
        /// Chunks done.
        done: u32,
        /// Total chunks.
        total: u32,
    },
    /// Wavelength steps accumulated out of the total (dispersion).
    Steps {
        /// Steps done.
        done: u32,
        /// Total steps.
        total: u32,
    },
    /// Labeled pipeline stage (FFT convolution).
    Stage {
        /// 1-based stage index.
        index: u32,
        /// Total stage count.
        total: u32,
        /// Human-readable stage name.
        label: &'static str,
    },
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Progress::None => write!(f, "starting"),
            Progress::Pixels { done, total } => write!(f, "{done}/{total} pixels"),
            Progress::Chunks { done, total } => write!(f, "{done}/{total} chunks"),
            Progress::Steps { done, total } => write!(f, "{done}/{total} steps"),
            Progress::Stage { index, total, label } => write!(f, "{index}/{total} {label}"),
        }
    }
}

/// Snapshot of an engine's state, safe to hold across frames.
#[derive(Debug, Clone, Default)]
pub struct RunStatus {
    /// Current phase.
    pub phase: Phase,
    /// Failure message when `phase == Failed`.
    pub error: Option<String>,
    /// Latest progress report.
    pub progress: Progress,
    /// Wall time of the last finished run, or elapsed time while working.
    pub elapsed: Option<Duration>,
}

#[derive(Debug, Default)]
struct StateInner {
    phase: Phase,
    error: Option<String>,
    progress: Progress,
    started: Option<Instant>,
    elapsed: Option<Duration>,
}

/// Shared run state: phase, progress, and the cooperative cancel flag.
#[derive(Debug, Default)]
pub struct RunState {
    inner: Mutex<StateInner>,
    cancel: AtomicBool,
}

impl RunState {
    /// Creates an idle state machine.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transitions to `Working`, clearing any previous result and the
    /// cancel flag. Called by the engine right before launching the run.
    pub fn begin(&self) {
        self.cancel.store(false, Ordering::SeqCst);
        let mut inner = self.lock();
        inner.phase = Phase::Working;
        inner.error = None;
        inner.progress = Progress::None;
        inner.started = Some(Instant::now());
        inner.elapsed = None;
    }

    /// Requests cooperative cancellation of the current run.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// `true` once cancellation has been requested.
    #[inline]
    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Bails out with [`Error::Canceled`] if cancellation was requested.
    #[inline]
    pub fn check_canceled(&self) -> Result<()> {
        if self.cancel_requested() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }

    /// Publishes a progress report.
    pub fn set_progress(&self, progress: Progress) {
        self.lock().progress = progress;
    }

    /// Applies the run's single terminal transition.
    ///
    /// `Ok` lands in `Done`, `Err(Canceled)` resets to `Idle` without an
    /// error, and any other error lands in `Failed` with its message.
    pub fn finish(&self, result: Result<()>) {
        let mut inner = self.lock();
        inner.elapsed = inner.started.map(|t| t.elapsed());
        match result {
            Ok(()) => inner.phase = Phase::Done,
            Err(err) if err.is_canceled() => {
                inner.phase = Phase::Idle;
                inner.error = None;
                inner.progress = Progress::None;
                inner.elapsed = None;
            }
            Err(err) => {
                inner.phase = Phase::Failed;
                inner.error = Some(err.to_string());
            }
        }
    }

    /// Resets to `Idle`, discarding any recorded result.
    pub fn reset(&self) {
        self.cancel.store(false, Ordering::SeqCst);
        let mut inner = self.lock();
        inner.phase = Phase::Idle;
        inner.error = None;
        inner.progress = Progress::None;
        inner.started = None;
        inner.elapsed = None;
    }

    /// `true` while a run is in progress.
    pub fn is_working(&self) -> bool {
        self.lock().phase == Phase::Working
    }

    /// Snapshot of the current state.
    pub fn status(&self) -> RunStatus {
        let inner = self.lock();
        RunStatus {
            phase: inner.phase,
            error: inner.error.clone(),
            progress: inner.progress.clone(),
            elapsed: match inner.phase {
                Phase::Working => inner.started.map(|t| t.elapsed()),
                _ => inner.elapsed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_done() {
        let state = RunState::new();
        assert_eq!(state.status().phase, Phase::Idle);

        state.begin();
        assert!(state.is_working());

        state.finish(Ok(()));
        let status = state.status();
        assert_eq!(status.phase, Phase::Done);
        assert!(status.error.is_none());
        assert!(status.elapsed.is_some());
    }

    #[test]
    fn test_lifecycle_failed() {
        let state = RunState::new();
        state.begin();
        state.finish(Err(Error::config("kernel is empty")));

        let status = state.status();
        assert_eq!(status.phase, Phase::Failed);
        assert!(status.error.as_deref().unwrap().contains("kernel is empty"));
    }

    #[test]
    fn test_cancel_resets_to_idle_without_error() {
        let state = RunState::new();
        state.begin();
        state.request_cancel();
        assert!(state.check_canceled().is_err());

        state.finish(Err(Error::Canceled));
        let status = state.status();
        assert_eq!(status.phase, Phase::Idle);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_begin_clears_previous_result() {
        let state = RunState::new();
        state.begin();
        state.finish(Err(Error::internal("boom")));
        assert_eq!(state.status().phase, Phase::Failed);

        state.begin();
        let status = state.status();
        assert_eq!(status.phase, Phase::Working);
        assert!(status.error.is_none());
        assert!(!state.cancel_requested());
    }

    #[test]
    fn test_progress_display() {
        assert_eq!(Progress::Pixels { done: 3, total: 9 }.to_string(), "3/9 pixels");
        assert_eq!(
            Progress::Stage { index: 2, total: 14, label: "forward input R" }.to_string(),
            "2/14 forward input R"
        );
    }
}

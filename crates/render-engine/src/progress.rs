//! Render progress and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clipframe_common::clock::RenderClock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::PipelineError;

/// Progress callback for render runs.
pub type ProgressCallback = Box<dyn Fn(RenderProgress) + Send + Sync>;

/// Coarse phase of a render run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderPhase {
    Initializing,
    Rendering,
    Finalizing,
}

/// Render progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderProgress {
    pub phase: RenderPhase,

    /// Percent complete within `phase`, `[0, 100]`.
    pub percent: f64,

    /// Frames inside the trim range handled so far.
    pub frames_processed: u64,

    /// Frames inside the trim range.
    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,
}

/// Emits progress reports that never go backwards within a phase.
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    clock: RenderClock,
    phase: RenderPhase,
    percent: f64,
    total_frames: u64,
    /// Last whole percent reported while rendering.
    reported_step: Option<u64>,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            clock: RenderClock::start(),
            phase: RenderPhase::Initializing,
            percent: 0.0,
            total_frames: 0,
            reported_step: None,
        }
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    pub fn set_total_frames(&mut self, total: u64) {
        self.total_frames = total;
    }

    /// Switch to `phase` and report it at 0 %.
    pub fn enter(&mut self, phase: RenderPhase) {
        self.phase = phase;
        self.percent = 0.0;
        self.reported_step = None;
        self.emit(0);
    }

    /// Report that `processed` trim frames are done. Reports are throttled
    /// to whole-percent steps.
    pub fn frames_done(&mut self, processed: u64) {
        let percent = if self.total_frames == 0 {
            0.0
        } else {
            (processed as f64 / self.total_frames as f64 * 100.0).clamp(0.0, 100.0)
        };
        if percent < self.percent {
            return;
        }
        self.percent = percent;

        let step = percent.floor() as u64;
        if self.reported_step.is_some_and(|last| last >= step) {
            return;
        }
        self.reported_step = Some(step);
        self.emit(processed);
    }

    /// Report the current phase as complete.
    pub fn complete_phase(&mut self) {
        self.percent = 100.0;
        self.reported_step = Some(100);
        self.emit(self.total_frames);
    }

    fn emit(&self, processed: u64) {
        let Some(callback) = &self.callback else {
            return;
        };
        let eta_secs = if self.phase == RenderPhase::Rendering {
            self.clock.eta_secs(self.percent / 100.0)
        } else {
            0.0
        };
        callback(RenderProgress {
            phase: self.phase,
            percent: self.percent,
            frames_processed: processed,
            total_frames: self.total_frames,
            eta_secs,
        });
    }
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation signal shared between a run and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call at any time, any number of times.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            tracing::info!("Render cancellation requested");
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Aborted)` once cancelled.
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (Arc<Mutex<Vec<RenderProgress>>>, ProgressCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Box::new(move |p| sink.lock().unwrap().push(p));
        (seen, callback)
    }

    #[test]
    fn test_progress_is_monotonic_within_phase() {
        let (seen, callback) = recording();
        let mut reporter = ProgressReporter::new(Some(callback));
        reporter.set_total_frames(200);
        reporter.enter(RenderPhase::Rendering);
        for n in [1, 2, 50, 40, 100, 199, 200] {
            reporter.frames_done(n);
        }
        reporter.enter(RenderPhase::Finalizing);
        reporter.complete_phase();

        let seen = seen.lock().unwrap();
        let rendering: Vec<f64> = seen
            .iter()
            .filter(|p| p.phase == RenderPhase::Rendering)
            .map(|p| p.percent)
            .collect();
        assert!(rendering.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(rendering.last().copied(), Some(100.0));
        // The phase start plus one report inside the first whole percent.
        assert_eq!(rendering.iter().filter(|p| **p < 1.0).count(), 2);
        assert_eq!(seen.last().map(|p| (p.phase, p.percent)), Some((RenderPhase::Finalizing, 100.0)));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let flag = CancelFlag::new();
        assert!(flag.check().is_ok());

        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.cancelled().await })
        };
        tokio::task::yield_now().await;
        flag.cancel();
        waiter.await.unwrap();
        assert_eq!(flag.check(), Err(PipelineError::Aborted));
    }
}

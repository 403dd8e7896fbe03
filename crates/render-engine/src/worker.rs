//! Background render worker.
//!
//! Each render runs on its own named thread with a current-thread tokio
//! runtime, so a long transcode never blocks the caller. The caller talks
//! to it through a [`RenderHandle`]: progress and exactly one terminal
//! event arrive on a channel, and `cancel()` ends the run silently.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use clipframe_common::error::{ClipframeError, ClipframeResult};
use clipframe_media_model::RenderConfig;

use crate::codec::CodecBackend;
use crate::pipeline::{PipelineConfig, RenderOutput, TranscodePipeline};
use crate::progress::{CancelFlag, ProgressCallback, RenderProgress};

/// Messages from a render worker.
#[derive(Debug, Clone)]
pub enum RenderEvent {
    Progress(RenderProgress),
    /// Terminal: the finished container.
    Done(RenderOutput),
    /// Terminal: the run failed.
    Error(String),
}

impl RenderEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RenderEvent::Progress(_))
    }
}

/// One render to perform.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source: Bytes,
    pub config: RenderConfig,
}

/// Starts render runs on worker threads.
#[derive(Clone)]
pub struct RenderWorker {
    backend: Arc<dyn CodecBackend>,
    config: PipelineConfig,
}

impl RenderWorker {
    pub fn new(backend: Arc<dyn CodecBackend>, config: PipelineConfig) -> Self {
        Self { backend, config }
    }

    /// Start `request` on a fresh thread. The run owns its own pipeline and
    /// codec sessions; nothing is shared with other runs.
    pub fn spawn(&self, request: RenderRequest) -> ClipframeResult<RenderHandle> {
        let (tx, rx) = mpsc::channel::<RenderEvent>();
        let cancel = CancelFlag::new();

        let pipeline = TranscodePipeline::new(self.backend.clone(), self.config.clone())
            .with_cancel(cancel.clone());
        let run_cancel = cancel.clone();

        let thread = std::thread::Builder::new()
            .name("clipframe-render".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        let _ = tx.send(RenderEvent::Error(format!(
                            "Failed to create runtime: {err}"
                        )));
                        return;
                    }
                };

                let tx_progress = tx.clone();
                let progress: ProgressCallback = Box::new(move |p| {
                    let _ = tx_progress.send(RenderEvent::Progress(p));
                });

                let result = runtime.block_on(pipeline.run(
                    request.source,
                    &request.config,
                    Some(progress),
                ));
                // Sessions are gone by now; only the terminal message is left.
                drop(pipeline);

                if run_cancel.is_cancelled() {
                    return;
                }
                let terminal = match result {
                    Ok(output) => RenderEvent::Done(output),
                    Err(e) if e.is_aborted() => return,
                    Err(e) => RenderEvent::Error(e.to_string()),
                };
                let _ = tx.send(terminal);
            })
            .map_err(|e| ClipframeError::render(format!("Failed to spawn render thread: {e}")))?;

        tracing::info!("Render worker started");
        Ok(RenderHandle {
            cancel,
            events: rx,
            thread: Some(thread),
        })
    }
}

/// Caller side of a running render.
pub struct RenderHandle {
    cancel: CancelFlag,
    events: Receiver<RenderEvent>,
    thread: Option<JoinHandle<()>>,
}

impl RenderHandle {
    /// Stop the run. No terminal event will be sent afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Flag that cancels this run, for callers that hand the handle to
    /// another thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Next event, or `None` once the worker has exited without one.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<RenderEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// Block until the run ends. Returns the terminal event, or `None` for a
    /// cancelled run. Progress events are passed to `on_progress`.
    pub fn wait(mut self, mut on_progress: impl FnMut(RenderProgress)) -> Option<RenderEvent> {
        let mut terminal = None;
        while let Ok(event) = self.events.recv() {
            match event {
                RenderEvent::Progress(p) => on_progress(p),
                other => {
                    terminal = Some(other);
                    break;
                }
            }
        }
        self.join_thread();
        terminal
    }

    /// Wait for the worker thread to exit.
    pub fn join(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Render worker thread panicked");
            }
        }
    }
}

impl Drop for RenderHandle {
    /// Dropping a handle cancels its run and waits for teardown.
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel.cancel();
            self.join_thread();
        }
    }
}

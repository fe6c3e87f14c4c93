//! Lifecycle of the recording task.
//!
//! The supervisor owns the transcoder child and the upload of its stdout.
//! Shutdown is `Running -> Draining -> Exited`. A SIGTERM, or cancelling the
//! supervisor's token from elsewhere, starts draining: SIGTERM is forwarded
//! to the child once, after which the supervisor waits for the upload to
//! consume the rest of the stream. It never force-exits.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use nix::sys::signal::Signal;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::s3_uploader::{StreamUploader, UploadSummary};
use crate::transcoder::ChildProcess;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Exited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM, e.g. from `docker stop` or an ECS StopTask.
    Terminate,
    /// SIGINT. The signal source re-raises it as SIGTERM.
    Interrupt,
}

#[derive(Debug)]
pub struct ExitReport {
    pub child_exit_code: Option<i32>,
    pub upload: Result<UploadSummary>,
    pub signals_forwarded: usize,
    pub state: ShutdownState,
}

impl ExitReport {
    /// Process exit code: success only when the recording reached storage.
    pub fn exit_code(&self) -> i32 {
        if self.upload.is_ok() {
            0
        } else {
            1
        }
    }
}

pub struct Supervisor<U> {
    uploader: Arc<U>,
    key: String,
    state: ShutdownState,
    token: CancellationToken,
    signals_forwarded: usize,
}

impl<U> Supervisor<U>
where
    U: StreamUploader + 'static,
{
    pub fn new(uploader: Arc<U>, key: impl Into<String>) -> Self {
        Supervisor {
            uploader,
            key: key.into(),
            state: ShutdownState::Running,
            token: CancellationToken::new(),
            signals_forwarded: 0,
        }
    }

    pub fn state(&self) -> ShutdownState {
        self.state
    }

    /// Cancelled when shutdown starts. Cancelling it from outside starts
    /// shutdown the same way a SIGTERM does.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn begin_draining<C: ChildProcess>(&mut self, child: &mut C) {
        if self.state != ShutdownState::Running {
            return;
        }
        self.state = ShutdownState::Draining;
        self.token.cancel();
        match child.send_signal(Signal::SIGTERM) {
            Ok(()) => self.signals_forwarded += 1,
            Err(e) => error!("[recording process] {:#}", e),
        }
    }

    fn on_signal<C: ChildProcess>(&mut self, signal: ShutdownSignal, child: &mut C) {
        match (self.state, signal) {
            (ShutdownState::Running, ShutdownSignal::Terminate) => {
                info!("[recording process] received SIGTERM, stopping ffmpeg");
                self.begin_draining(child);
            }
            (_, ShutdownSignal::Interrupt) => {
                info!("[recording process] received SIGINT, converted to SIGTERM");
            }
            (state, ShutdownSignal::Terminate) => {
                warn!("[recording process] received SIGTERM while {:?}, ignoring", state);
            }
        }
    }

    /// Runs until the upload of the child's stdout has finished, then reaps the child.
    pub async fn run<C, S>(mut self, mut child: C, mut signals: S) -> Result<ExitReport>
    where
        C: ChildProcess,
        S: Stream<Item = ShutdownSignal> + Unpin,
    {
        let stdout = child
            .take_stdout()
            .ok_or_else(|| anyhow!("child stdout is not available"))?;

        let uploader = self.uploader.clone();
        let key = self.key.clone();
        let token = self.token.clone();
        let mut upload = tokio::spawn(async move {
            let upload = uploader.upload_stream(&key, stdout);
            tokio::pin!(upload);
            tokio::select! {
                result = &mut upload => return result,
                _ = token.cancelled() => {
                    info!("[recording process] draining upload of {}", key);
                }
            }
            upload.await
        });

        let shutdown = self.token.clone();
        let mut signals_open = true;
        let upload_result = loop {
            tokio::select! {
                joined = &mut upload => {
                    break joined.unwrap_or_else(|e| Err(anyhow!("upload task failed: {}", e)));
                }
                signal = signals.next(), if signals_open => match signal {
                    Some(signal) => self.on_signal(signal, &mut child),
                    None => signals_open = false,
                },
                _ = shutdown.cancelled(), if self.state == ShutdownState::Running => {
                    info!("[recording process] shutdown requested, stopping ffmpeg");
                    self.begin_draining(&mut child);
                }
            }
        };

        match &upload_result {
            Ok(summary) => info!("[recording process] upload finished: {}", summary.url),
            Err(e) => error!("[recording process] upload failed: {:#}", e),
        }

        let child_exit_code = match child.wait().await {
            Ok(code) => code,
            Err(e) => {
                error!("[recording process] {:#}", e);
                None
            }
        };
        info!("[recording process] ffmpeg exited with code {:?}", child_exit_code);
        self.state = ShutdownState::Exited;

        Ok(ExitReport {
            child_exit_code,
            upload: upload_result,
            signals_forwarded: self.signals_forwarded,
            state: self.state,
        })
    }
}

use anyhow::{Context, Result};
use log::error;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio_stream::Stream;

use crate::supervisor::ShutdownSignal;

/// Process signals relevant to the recording task.
///
/// SIGINT (ctrl + c while debugging) is turned into a SIGTERM for the whole
/// process, so the stream yields `Interrupt` followed by `Terminate`.
pub fn shutdown_signals() -> Result<impl Stream<Item = ShutdownSignal>> {
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    Ok(async_stream::stream! {
        loop {
            let received = tokio::select! {
                Some(()) = sigterm.recv() => ShutdownSignal::Terminate,
                Some(()) = sigint.recv() => {
                    if let Err(e) = kill(Pid::this(), Signal::SIGTERM) {
                        error!("[recording process] failed to raise SIGTERM: {}", e);
                    }
                    ShutdownSignal::Interrupt
                }
                else => break,
            };
            yield received;
        }
    })
}

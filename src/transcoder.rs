use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use crate::s3_uploader::BoxedReader;
use crate::utilities::log_timestamp;

const FFMPEG_LAUNCH_CMD: &str = "ffmpeg";

pub const AUDIO_BITRATE: &str = "128k";
pub const AUDIO_SAMPLE_RATE: u32 = 44100;
pub const AUDIO_CHANNELS: u32 = 2;

/// Arguments for the capture pipeline: default PulseAudio input, encoded and
/// written to stdout in a container that needs no seeking.
pub fn ffmpeg_args() -> Vec<String> {
    let channels = AUDIO_CHANNELS.to_string();
    let sample_rate = AUDIO_SAMPLE_RATE.to_string();
    let args: [&str; 23] = [
        "-hide_banner",
        "-loglevel",
        "error",
        // disable interaction via stdin
        "-nostdin",
        "-f",
        "pulse",
        "-ac",
        "2",
        "-i",
        "default",
        "-c:a",
        "aac",
        "-b:a",
        AUDIO_BITRATE,
        "-ac",
        channels.as_str(),
        "-ar",
        sample_rate.as_str(),
        // stdout is not seekable
        "-movflags",
        "frag_keyframe+empty_moov",
        "-f",
        "mp3",
        "-",
    ];
    args.iter().map(|arg| arg.to_string()).collect()
}

/// A supervised subprocess whose stdout is the recording stream.
#[async_trait]
pub trait ChildProcess: Send {
    /// Hands out stdout. Returns `None` once taken.
    fn take_stdout(&mut self) -> Option<BoxedReader>;

    fn send_signal(&mut self, signal: Signal) -> Result<()>;

    /// Waits for the process to exit and returns its exit code, `None` when killed by a signal.
    async fn wait(&mut self) -> Result<Option<i32>>;
}

pub struct FfmpegProcess {
    child: Child,
    stderr_logger: Option<JoinHandle<usize>>,
    stderr_lines: usize,
}

impl FfmpegProcess {
    /// Starts ffmpeg with the fixed audio pipeline.
    pub fn spawn() -> Result<Self> {
        Self::spawn_command(FFMPEG_LAUNCH_CMD, &ffmpeg_args())
    }

    pub fn spawn_command(program: &str, args: &[String]) -> Result<Self> {
        debug!("Spawning {} {}", program, args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start {}", program))?;

        let stderr_logger = child.stderr.take().map(|stderr| tokio::spawn(log_stderr(stderr)));
        info!("[recording process] started {} with pid {:?}", program, child.id());

        Ok(FfmpegProcess {
            child,
            stderr_logger,
            stderr_lines: 0,
        })
    }

    /// Stderr lines logged so far. Complete once `wait` has returned.
    pub fn stderr_lines(&self) -> usize {
        self.stderr_lines
    }
}

/// Logs stderr line by line until EOF and returns the number of lines seen.
/// Lines are decoded lossily; the pipe is drained to the end either way so
/// the child never writes into a closed pipe.
async fn log_stderr(stderr: ChildStderr) -> usize {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut lines = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                lines += 1;
                let line = String::from_utf8_lossy(&buf);
                info!(
                    "[ffmpeg] stderr: {} {}",
                    log_timestamp(Utc::now()),
                    line.trim_end_matches(&['\r', '\n'][..])
                );
            }
            Err(e) => {
                error!("[ffmpeg] failed to read stderr: {}", e);
                break;
            }
        }
    }
    lines
}

#[async_trait]
impl ChildProcess for FfmpegProcess {
    fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as BoxedReader)
    }

    fn send_signal(&mut self, sig: Signal) -> Result<()> {
        let Some(id) = self.child.id() else {
            debug!("child already exited, not sending {}", sig);
            return Ok(());
        };
        let pid = i32::try_from(id).map_err(|_| anyhow!("pid {} out of range", id))?;
        signal::kill(Pid::from_raw(pid), sig)
            .with_context(|| format!("failed to send {} to pid {}", sig, pid))
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await.context("waiting for ffmpeg")?;
        if let Some(logger) = self.stderr_logger.take() {
            match logger.await {
                Ok(lines) => self.stderr_lines = lines,
                Err(e) => error!("[ffmpeg] stderr logger failed: {}", e),
            }
        }
        if status.code().is_none() {
            use std::os::unix::process::ExitStatusExt;
            info!("[recording process] ffmpeg terminated by signal {:?}", status.signal());
        }
        Ok(status.code())
    }
}

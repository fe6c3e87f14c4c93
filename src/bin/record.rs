use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use log::{error, info};

use meeting_recorder::aws;
use meeting_recorder::config::{RecordingArgs, RecordingEnv};
use meeting_recorder::s3_uploader::S3Uploader;
use meeting_recorder::signals::shutdown_signals;
use meeting_recorder::supervisor::Supervisor;
use meeting_recorder::transcoder::FfmpegProcess;
use meeting_recorder::utilities::recording_object_key;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let code = match RecordingArgs::try_parse() {
        Ok(args) => match record(args).await {
            Ok(code) => code,
            Err(e) => {
                error!("[recording process] {:#}", e);
                1
            }
        },
        Err(e) => {
            let _ = e.print();
            e.exit_code()
        }
    };

    info!("[recording process] exit code {}", code);
    std::process::exit(code);
}

async fn record(args: RecordingArgs) -> Result<i32> {
    let env = RecordingEnv::from_env();
    info!("[recording process] MEETING_URL: {}", env.meeting_url);
    info!("[recording process] BUCKET_NAME: {}", args.bucket_name);
    info!(
        "[recording process] BROWSER_SCREEN_WIDTH: {:?}, BROWSER_SCREEN_HEIGHT: {:?}, DISPLAY: {:?}",
        args.screen_width, args.screen_height, env.display
    );

    let key = recording_object_key(Utc::now());
    info!("[recording process] recording to s3://{}/{}", args.bucket_name, key);

    // Handlers go in before ffmpeg starts so an early docker stop is not lost.
    let signals = Box::pin(shutdown_signals()?);

    let shared_config = aws::load_shared_config().await;
    let uploader = Arc::new(S3Uploader::new(
        &shared_config,
        &args.bucket_name,
        args.s3_endpoint.as_deref(),
    ));

    let child = FfmpegProcess::spawn()?;
    let report = Supervisor::new(uploader, key).run(child, signals).await?;
    Ok(report.exit_code())
}

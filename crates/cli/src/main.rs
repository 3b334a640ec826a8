//! CLI entry point for Rerun Encoder
//!
//! Transcodes a local recording when its container differs from the
//! configured one, then publishes it to the Rerun Manager service.

use clap::Parser;
use rerun_encoder::{
    deliver, derive_output_path, needs_transcode, run_preflight, Config, FfmpegTranscoder,
    HttpUploader, Job, JobController, JobEvent, JobListener, PublishOptions, RemotePublishClient,
    RemoteVideo,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Rerun Encoder - transcode and publish a recording
#[derive(Parser, Debug)]
#[command(name = "rerun-encoder")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Recording to publish
    input: PathBuf,

    /// Title of the published video
    #[arg(short, long)]
    title: String,

    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Publish the video once the upload is confirmed
    #[arg(long, default_value = "false")]
    publish: bool,

    /// Print job events as JSON lines on stdout
    #[arg(long, default_value = "false")]
    json_events: bool,

    /// Skip preflight checks (session, ffmpeg version). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    }
}

/// Falls back to defaults plus environment when the file is absent
fn load_config(path: &Path) -> Result<Config, String> {
    if path.exists() {
        return Config::load(path).map_err(|e| e.to_string());
    }
    info!(path = %path.display(), "config file not found, using defaults and environment");
    let mut config = Config::default();
    config.apply_env_overrides();
    Ok(config)
}

/// Logs every lifecycle event
struct LoggingListener;

impl JobListener for LoggingListener {
    fn on_start(&mut self, id: &str) {
        info!(job = id, "job started");
    }

    fn on_progress(&mut self, id: &str, percent: f64) {
        info!(job = id, "encoding {:.1}%", percent);
    }

    fn on_upload_progress(&mut self, id: &str, percent: f64) {
        info!(job = id, "uploading {:.1}%", percent);
    }

    fn on_upload_complete(&mut self, id: &str, record: &RemoteVideo) {
        info!(job = id, video = %record.id, status = ?record.status, "upload complete");
    }

    fn on_error(&mut self, id: &str, message: &str) {
        error!(job = id, "{}", message);
    }
}

/// Remove the transcoded artifact; the user's input is never touched
async fn delete_output(input: &Path, container: &str) {
    if !needs_transcode(input, container) {
        return;
    }
    let output = derive_output_path(input, container);
    match tokio::fs::remove_file(&output).await {
        Ok(()) => info!(path = %output.display(), "deleted transcoded output"),
        Err(e) => {
            warn!(path = %output.display(), error = %e, "failed to delete transcoded output")
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let transcode = needs_transcode(&args.input, &config.output.container);
    if args.skip_checks {
        warn!("Skipping preflight checks (--skip-checks enabled)");
    } else if let Err(e) = run_preflight(&config, transcode) {
        error!("Preflight failed: {}", e);
        return ExitCode::FAILURE;
    }

    let uploader = match HttpUploader::from_config(&config.upload) {
        Ok(uploader) => uploader,
        Err(e) => {
            error!("Failed to build upload client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = Arc::new(config);
    let (controller, mut events) = JobController::new(
        Arc::new(FfmpegTranscoder::new(&config.transcoder.ffmpeg_path)),
        Arc::new(uploader),
        Arc::new(RemotePublishClient::new()),
        config.clone(),
    );

    let job = Job::new(
        uuid::Uuid::new_v4().to_string(),
        &args.input,
        PublishOptions {
            title: args.title.clone(),
            publish_on_complete: args.publish,
        },
    );

    let handle = match controller.submit(job) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to submit job: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut listener = LoggingListener;
    let mut completed = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if args.json_events {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!(error = %e, "failed to serialize event"),
                    }
                } else {
                    deliver(&event, &mut listener);
                }
                if event.is_terminal() {
                    completed = matches!(event, JobEvent::UploadComplete { .. });
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupt received, cancelling job");
                controller.cancel();
            }
        }
    }

    if let Err(e) = handle.await {
        error!("Job task panicked: {}", e);
        return ExitCode::FAILURE;
    }

    if !completed {
        return ExitCode::FAILURE;
    }

    if config.delete_on_complete {
        delete_output(&args.input, &config.output.container).await;
    }

    ExitCode::SUCCESS
}

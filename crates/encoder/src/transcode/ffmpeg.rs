//! ffmpeg transcode driver
//!
//! Builds the ffmpeg invocation from an [`EncodeOutputSpec`], runs it, turns
//! its progress stream into percentages and supports forceful termination.

use crate::config::EncodeOutputSpec;
use crate::events::ProgressFn;
use crate::transcode::progress::ProgressTracker;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Suffix appended to the input stem for derived outputs
const OUTPUT_SUFFIX: &str = "-rerun";

/// Number of stderr lines kept for failure messages
const STDERR_TAIL_LINES: usize = 5;

/// Error type for transcode operations
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// ffmpeg could not be started
    #[error("Failed to start ffmpeg: {0}")]
    Spawn(std::io::Error),

    /// ffmpeg exited with non-zero status
    #[error("ffmpeg failed with exit code {code}: {detail}")]
    Failed { code: i32, detail: String },

    /// ffmpeg was terminated by a signal it did not receive from us
    #[error("ffmpeg process was terminated by signal")]
    Terminated,

    /// ffmpeg was stopped through `kill` or cancellation
    #[error("ffmpeg process was killed")]
    Killed,

    /// IO error while supervising the process
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transcoding engine driven as a black box
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcode `input` into `output`, reporting percent complete
    ///
    /// Returns [`TranscodeError::Killed`] when stopped via `cancel` or [`Transcoder::kill`].
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        spec: &EncodeOutputSpec,
        cancel: CancellationToken,
        on_progress: ProgressFn,
    ) -> Result<(), TranscodeError>;

    /// Request termination of the running process; no-op when idle
    fn kill(&self);
}

/// Derive the output path: `<dir>/<stem>-rerun.<container>`
pub fn derive_output_path(input: &Path, container: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    input.with_file_name(format!("{}{}.{}", stem, OUTPUT_SUFFIX, container))
}

/// Whether `input` must be transcoded to reach `container`
///
/// Inputs whose extension already matches the target are uploaded as-is.
pub fn needs_transcode(input: &Path, container: &str) -> bool {
    match input.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => !ext.eq_ignore_ascii_case(container),
        None => true,
    }
}

/// Build the ffmpeg command for one transcode
///
/// Creates a Command configured with:
/// - Input and output paths, overwriting any stale output
/// - Video/audio codecs, bitrates, preset, profile and CRF from the spec
/// - A fixed keyframe interval with scene-cut keyframes disabled
/// - Machine-readable progress on stdout
pub fn build_ffmpeg_command(
    program: &Path,
    input: &Path,
    output: &Path,
    spec: &EncodeOutputSpec,
) -> Command {
    let mut cmd = Command::new(program);

    cmd.arg("-hide_banner").arg("-nostats").arg("-y");
    cmd.arg("-i").arg(input);

    cmd.arg("-c:v").arg(&spec.video_encoder);
    if spec.preset != "default" {
        cmd.arg("-preset").arg(&spec.preset);
    }
    cmd.arg("-profile:v").arg(&spec.profile);
    cmd.arg("-crf").arg(spec.crf.to_string());
    cmd.arg("-maxrate").arg(format!("{}k", spec.video_bitrate));
    cmd.arg("-bufsize").arg(format!("{}k", spec.video_bitrate));

    // Fixed GOP so segmenters can cut on every keyframe
    cmd.arg("-g").arg(spec.keyframe_interval.to_string());
    cmd.arg("-keyint_min").arg(spec.keyframe_interval.to_string());
    cmd.arg("-sc_threshold").arg("0");

    cmd.arg("-c:a").arg(&spec.audio_encoder);
    cmd.arg("-b:a").arg(format!("{}k", spec.audio_bitrate));
    cmd.arg("-ac").arg(spec.audio_channels.to_string());

    cmd.arg("-f").arg(&spec.container);
    cmd.arg("-movflags").arg("+faststart");

    cmd.arg("-progress").arg("pipe:1");
    cmd.arg(output);

    cmd
}

/// Transcode driver backed by the ffmpeg binary
pub struct FfmpegTranscoder {
    program: PathBuf,
    /// Kill switch of the running process, cleared once it exits
    running: Mutex<Option<CancellationToken>>,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            running: Mutex::new(None),
        }
    }

    /// Whether a process is currently being supervised
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn set_running(&self, token: Option<CancellationToken>) {
        let mut guard = self.running.lock().unwrap_or_else(|e| e.into_inner());
        *guard = token;
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        spec: &EncodeOutputSpec,
        cancel: CancellationToken,
        on_progress: ProgressFn,
    ) -> Result<(), TranscodeError> {
        if cancel.is_cancelled() {
            return Err(TranscodeError::Killed);
        }

        let mut cmd = build_ffmpeg_command(&self.program, input, output, spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(command = ?cmd.as_std(), "spawning ffmpeg");

        let mut child = cmd.spawn().map_err(TranscodeError::Spawn)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stderr not captured"))?;

        let kill = cancel.child_token();
        self.set_running(Some(kill.clone()));
        info!(input = %input.display(), output = %output.display(), "transcode started");

        let mut progress_lines = BufReader::new(stdout).lines();
        let mut log_lines = BufReader::new(stderr).lines();
        let mut tracker = ProgressTracker::new();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut killed = false;

        let status = loop {
            tokio::select! {
                line = progress_lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => {
                        if let Some(percent) = tracker.observe_progress_line(&line) {
                            on_progress(percent);
                        }
                    }
                    _ => stdout_open = false,
                },
                line = log_lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        tracker.observe_log_line(&line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    _ => stderr_open = false,
                },
                _ = kill.cancelled(), if !killed => {
                    info!("terminating ffmpeg");
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to signal ffmpeg");
                    }
                    killed = true;
                },
                status = child.wait() => break status,
            }
        };

        self.set_running(None);
        let status = status?;

        if killed {
            return Err(TranscodeError::Killed);
        }

        if status.success() {
            // Progress written just before exit may still be buffered
            while stdout_open {
                match progress_lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(percent) = tracker.observe_progress_line(&line) {
                            on_progress(percent);
                        }
                    }
                    _ => stdout_open = false,
                }
            }
            info!(output = %output.display(), "transcode finished");
            return Ok(());
        }

        // Collect whatever stderr was still buffered for the error message
        while let Ok(Some(line)) = log_lines.next_line().await {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        let detail = tail.into_iter().collect::<Vec<_>>().join("\n");

        match status.code() {
            Some(code) => Err(TranscodeError::Failed { code, detail }),
            None => Err(TranscodeError::Terminated),
        }
    }

    fn kill(&self) {
        let guard = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = guard.as_ref() {
            token.cancel();
        }
    }
}

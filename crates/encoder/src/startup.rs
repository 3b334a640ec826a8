//! Preflight checks for Rerun Encoder
//!
//! Verifies before a job is submitted that:
//! - the configured session is usable (signed in, token not expired)
//! - the ffmpeg binary runs, when the input needs transcoding

use crate::config::Config;
use crate::session::{SessionError, SessionProvider};
use std::fmt;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for preflight checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("Session check failed: {0}")]
    Session(#[from] SessionError),
}

/// Parsed ffmpeg release version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FfmpegVersion {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for FfmpegVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Parse the version from `ffmpeg -version` output
///
/// Handles release builds (`ffmpeg version 6.1.1 ...`) and git builds
/// prefixed with `n` (`ffmpeg version n7.0-12-g...`). Snapshot builds
/// without a numeric version (`N-113000-g...`) yield `None`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<FfmpegVersion> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let mut numbers = version_part
        .trim_start_matches('n')
        .split(|c: char| c == '.' || c == '-');
    let major = numbers.next()?.parse().ok()?;
    let minor = numbers
        .next()
        .and_then(|m| m.parse().ok())
        .unwrap_or(0);

    Some(FfmpegVersion { major, minor })
}

/// Check that `<ffmpeg> -version` runs and reports a version
pub fn check_ffmpeg_available(ffmpeg: &Path) -> Result<FfmpegVersion, StartupError> {
    let output = Command::new(ffmpeg).arg("-version").output().map_err(|e| {
        StartupError::FfmpegUnavailable(format!(
            "{} -version failed; is ffmpeg installed and in PATH? Error: {}",
            ffmpeg.display(),
            e
        ))
    })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            ffmpeg.display(),
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffmpeg_version(&stdout).ok_or_else(|| {
        StartupError::FfmpegUnavailable(format!(
            "Could not parse ffmpeg version from output: {}",
            stdout.lines().next().unwrap_or("(empty)")
        ))
    })
}

/// Run all preflight checks in order: session, then ffmpeg if needed
pub fn run_preflight(cfg: &Config, transcode_required: bool) -> Result<(), StartupError> {
    cfg.session()?;

    if transcode_required {
        check_ffmpeg_available(&cfg.transcoder.ffmpeg_path)?;
    }

    Ok(())
}

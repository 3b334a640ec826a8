//! Transcoding for Rerun Encoder

pub mod ffmpeg;
pub mod progress;

pub use ffmpeg::{
    build_ffmpeg_command, derive_output_path, needs_transcode, FfmpegTranscoder, TranscodeError,
    Transcoder,
};
pub use progress::{parse_timecode, ProgressTracker};

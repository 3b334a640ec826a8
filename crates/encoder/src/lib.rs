//! Rerun Encoder
//!
//! Transcodes a local video into a streaming-friendly container and publishes it
//! to the Rerun Manager content service, one job at a time.

pub mod controller;
pub mod events;
pub mod publish;
pub mod session;
pub mod startup;
pub mod transcode;
pub mod upload;

pub use controller::{
    Job, JobController, JobError, JobHandle, JobSnapshot, JobState, PublishOptions, SubmitError,
};
pub use events::{deliver, dispatch_events, JobEvent, JobListener, ProgressFn};
pub use publish::{PublishApi, PublishError, RemotePublishClient, RemoteVideo, VideoStatus};
pub use rerun_encoder_config as config;
pub use rerun_encoder_config::{Config, EncodeOutputSpec};
pub use session::{Session, SessionError, SessionProvider};
pub use startup::{
    check_ffmpeg_available, parse_ffmpeg_version, run_preflight, FfmpegVersion, StartupError,
};
pub use transcode::{
    build_ffmpeg_command, derive_output_path, needs_transcode, FfmpegTranscoder, ProgressTracker,
    TranscodeError, Transcoder,
};
pub use upload::{HttpUploader, UploadError, UploadTransport};

//! Core configuration structures and loading logic

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Control-plane API settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Base URL of the versioned API (e.g. `https://api.rerunmanager.com/v1/`)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    "https://api.rerunmanager.com/v1/".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
        }
    }
}

/// OAuth credentials of the signed-in user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Channel owner id used for reservation requests
    #[serde(default)]
    pub user_id: String,
    /// Token expiry; `None` means the token does not expire
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            token_type: default_token_type(),
            user_id: String::new(),
            expires_at: None,
        }
    }
}

impl Credentials {
    /// Whether an access token and user id are both present
    pub fn is_present(&self) -> bool {
        !self.access_token.is_empty() && !self.user_id.is_empty()
    }

    /// Whether the token expired before `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Encode output specification handed to the transcoder
///
/// Every encoder parameter lives here so the transcoder never hardcodes one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodeOutputSpec {
    #[serde(default = "default_video_encoder")]
    pub video_encoder: String,
    /// Video bitrate ceiling in kbit/s
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: u32,
    #[serde(default = "default_audio_encoder")]
    pub audio_encoder: String,
    /// Audio bitrate in kbit/s
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: u32,
    #[serde(default = "default_audio_channels")]
    pub audio_channels: u8,
    /// Encoder preset; "default" leaves the encoder's own preset in place
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// Target container, also used as the output file extension
    #[serde(default = "default_container")]
    pub container: String,
    /// Keyframe interval in frames (GOP size) for segment-based delivery
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u32,
}

fn default_video_encoder() -> String {
    "libx264".to_string()
}

fn default_video_bitrate() -> u32 {
    4500
}

fn default_audio_encoder() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> u32 {
    128
}

fn default_audio_channels() -> u8 {
    2
}

fn default_preset() -> String {
    "fast".to_string()
}

fn default_profile() -> String {
    "high".to_string()
}

fn default_crf() -> u8 {
    23
}

fn default_container() -> String {
    "flv".to_string()
}

fn default_keyframe_interval() -> u32 {
    60
}

impl Default for EncodeOutputSpec {
    fn default() -> Self {
        Self {
            video_encoder: default_video_encoder(),
            video_bitrate: default_video_bitrate(),
            audio_encoder: default_audio_encoder(),
            audio_bitrate: default_audio_bitrate(),
            audio_channels: default_audio_channels(),
            preset: default_preset(),
            profile: default_profile(),
            crf: default_crf(),
            container: default_container(),
            keyframe_interval: default_keyframe_interval(),
        }
    }
}

/// Transcoder binary settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscoderConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

/// Upload transport settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    /// Read size per streamed chunk, in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_content_type() -> String {
    "video/x-flv".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            content_type: default_content_type(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub output: EncodeOutputSpec,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    /// Delete the transcoded artifact once it has been published
    #[serde(default = "default_delete_on_complete")]
    pub delete_on_complete: bool,
}

fn default_delete_on_complete() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            credentials: Credentials::default(),
            output: EncodeOutputSpec::default(),
            transcoder: TranscoderConfig::default(),
            upload: UploadConfig::default(),
            delete_on_complete: default_delete_on_complete(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// - RERUN_ENDPOINT -> api.endpoint
    /// - RERUN_ACCESS_TOKEN -> credentials.access_token
    /// - RERUN_TOKEN_TYPE -> credentials.token_type
    /// - RERUN_USER_ID -> credentials.user_id
    /// - RERUN_FFMPEG_PATH -> transcoder.ffmpeg_path
    /// - RERUN_DELETE_ON_COMPLETE -> delete_on_complete
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RERUN_ENDPOINT") {
            if !val.is_empty() {
                self.api.endpoint = val;
            }
        }

        if let Ok(val) = env::var("RERUN_ACCESS_TOKEN") {
            self.credentials.access_token = val;
        }

        if let Ok(val) = env::var("RERUN_TOKEN_TYPE") {
            if !val.is_empty() {
                self.credentials.token_type = val;
            }
        }

        if let Ok(val) = env::var("RERUN_USER_ID") {
            self.credentials.user_id = val;
        }

        if let Ok(val) = env::var("RERUN_FFMPEG_PATH") {
            if !val.is_empty() {
                self.transcoder.ffmpeg_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("RERUN_DELETE_ON_COMPLETE") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.delete_on_complete = true,
                "false" | "0" | "no" => self.delete_on_complete = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::command::ActuationCommand;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    pub channel: ChannelConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Hosted chat-completions API (base64 JPEG as a data URI).
    Hosted,
    /// Locally served generate endpoint (Ollama-style).
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default = "default_classify_timeout")]
    pub timeout_secs: f64,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub hosted: HostedConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostedConfig {
    #[serde(default = "default_hosted_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_hosted_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Resolved from `api_key_env` at load time, never read from the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_local_model")]
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    /// One-shot ffmpeg grab from `/dev/video{index}`.
    V4l2,
    /// HTTP GET of a JPEG snapshot URL.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: u32,
    #[serde(default = "default_camera_source")]
    pub source: CameraSource,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_input_format")]
    pub ffmpeg_input_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,
    #[serde(default = "default_mute_command")]
    pub mute: ActuationCommand,
    #[serde(default = "default_mute_command")]
    pub unmute: ActuationCommand,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_period_seconds")]
    pub period_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_archive_dir")]
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            timeout_secs: default_classify_timeout(),
            prompt: default_prompt(),
            hosted: HostedConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_hosted_endpoint(),
            model: default_hosted_model(),
            api_key_env: default_api_key_env(),
            api_key: None,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            endpoint: default_local_endpoint(),
            model: default_local_model(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            source: default_camera_source(),
            url: None,
            ffmpeg_input_format: default_input_format(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            period_seconds: default_period_seconds(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_archive_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let mut config = Self::parse(&content)?;
        let key_env = config.classifier.hosted.api_key_env.clone();
        config.classifier.hosted.api_key = std::env::var(&key_env).ok().filter(|k| !k.is_empty());
        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the environment or validating credentials.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive_duration("capture.period_seconds", self.capture.period_seconds)?;
        positive_duration("classifier.timeout_secs", self.classifier.timeout_secs)?;
        if self.channel.prompt_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "channel.prompt_timeout_ms",
                message: "must be greater than zero".into(),
            });
        }
        for (key, command) in [
            ("channel.mute", &self.channel.mute),
            ("channel.unmute", &self.channel.unmute),
        ] {
            command.validate().map_err(|e| ConfigError::Invalid {
                key,
                message: e.to_string(),
            })?;
        }
        if self.classifier.backend == Backend::Hosted && self.classifier.hosted.api_key.is_none() {
            return Err(ConfigError::Invalid {
                key: "classifier.hosted.api_key_env",
                message: format!(
                    "hosted backend selected but ${} is not set",
                    self.classifier.hosted.api_key_env
                ),
            });
        }
        if self.camera.source == CameraSource::Http && self.camera.url.is_none() {
            return Err(ConfigError::Invalid {
                key: "camera.url",
                message: "http camera source requires a snapshot url".into(),
            });
        }
        Ok(())
    }
}

impl ClassifierConfig {
    /// Upper bound on one classification. Falls back to the default when the
    /// configured value does not fit a `Duration`; `validate` rejects those.
    pub fn timeout(&self) -> Duration {
        positive_duration("classifier.timeout_secs", self.timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_classify_timeout()))
    }
}

impl CaptureConfig {
    /// Capture period, with the same fallback as `ClassifierConfig::timeout`.
    pub fn period(&self) -> Duration {
        positive_duration("capture.period_seconds", self.period_seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_period_seconds()))
    }
}

/// Seconds as a non-zero `Duration`. Values that round down to zero or
/// overflow are rejected rather than left to panic later.
fn positive_duration(key: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(ConfigError::Invalid {
            key,
            message: format!("must be a positive number of seconds, got {secs}"),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

// Default value functions
fn default_backend() -> Backend {
    Backend::Hosted
}
fn default_classify_timeout() -> f64 {
    20.0
}
fn default_prompt() -> String {
    "Return whether the image on the TV is an ad or not in JSON format \
     (e.g., {'content': 'ad'} or {'content': 'show'}). \
     Reply with the JSON object only."
        .into()
}
fn default_hosted_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}
fn default_hosted_model() -> String {
    "gpt-4o-mini".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_local_endpoint() -> String {
    "http://localhost:11434/api/generate".into()
}
fn default_local_model() -> String {
    "llava".into()
}
fn default_camera_source() -> CameraSource {
    CameraSource::V4l2
}
fn default_input_format() -> String {
    "v4l2".into()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_prompt_timeout_ms() -> u64 {
    2_000
}
fn default_mute_command() -> ActuationCommand {
    ActuationCommand::Infrared {
        protocol: "NEC".into(),
        address: 0x04,
        command: 0x09,
    }
}
fn default_period_seconds() -> f64 {
    3.0
}
fn default_archive_dir() -> String {
    "frames/".into()
}
fn default_log_level() -> String {
    "info".into()
}

use admute_common::config::{CameraConfig, CameraSource};
use admute_common::frame::Frame;
use async_trait::async_trait;
use chrono::Utc;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(std::io::Error),
    #[error("ffmpeg exited with {status}: {stderr}")]
    Ffmpeg { status: String, stderr: String },
    #[error("camera request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("camera returned HTTP {0}")]
    HttpStatus(u16),
    #[error("camera returned an empty frame")]
    EmptyFrame,
}

/// Where frames come from. A failed read means "no frame this cycle".
#[async_trait]
pub trait FrameSource: Send {
    async fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

pub fn from_config(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    let source: Box<dyn FrameSource> = match config.source {
        CameraSource::V4l2 => Box::new(FfmpegCamera::new(config.index, &config.ffmpeg_input_format)),
        CameraSource::Http => {
            let url = config.url.clone().unwrap_or_default();
            Box::new(HttpSnapshotCamera::new(url)?)
        }
    };
    Ok(source)
}

/// Grabs one JPEG per call by running ffmpeg against a local capture device.
pub struct FfmpegCamera {
    input_format: String,
    device: String,
    seq: u64,
}

impl FfmpegCamera {
    pub fn new(index: u32, input_format: &str) -> Self {
        // v4l2 wants a device node; avfoundation and dshow take the index itself.
        let device = match input_format {
            "v4l2" => format!("/dev/video{index}"),
            _ => index.to_string(),
        };
        Self {
            input_format: input_format.to_string(),
            device,
            seq: 0,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-hide_banner",
            "-loglevel", "error",
            "-f", self.input_format.as_str(),
            "-i", self.device.as_str(),
            "-frames:v", "1",
            "-f", "image2pipe",
            "-vcodec", "mjpeg",
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl FrameSource for FfmpegCamera {
    async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let output = self.command().output().await.map_err(CaptureError::Spawn)?;

        if !output.status.success() {
            return Err(CaptureError::Ffmpeg {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if output.stdout.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }

        let seq = self.seq;
        self.seq += 1;
        debug!(device = self.device(), seq, bytes = output.stdout.len(), "frame captured");
        Ok(Frame::new(output.stdout, Utc::now().timestamp_millis(), seq))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Fetches a JPEG snapshot from a network camera on each call.
pub struct HttpSnapshotCamera {
    client: reqwest::Client,
    url: String,
    seq: u64,
}

impl HttpSnapshotCamera {
    pub fn new(url: String) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url, seq: 0 })
    }
}

#[async_trait]
impl FrameSource for HttpSnapshotCamera {
    async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(CaptureError::HttpStatus(resp.status().as_u16()));
        }
        let jpeg = resp.bytes().await?.to_vec();
        if jpeg.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }

        let seq = self.seq;
        self.seq += 1;
        debug!(url = self.url, seq, bytes = jpeg.len(), "frame fetched");
        Ok(Frame::new(jpeg, Utc::now().timestamp_millis(), seq))
    }

    fn name(&self) -> &str {
        "http"
    }
}

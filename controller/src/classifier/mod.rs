pub mod hosted;
pub mod local;
pub mod parse;

use admute_common::config::{Backend, ClassifierConfig};
use admute_common::label::Label;
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;
use tracing::{debug, warn};

use hosted::HostedBackend;
use local::LocalBackend;
use parse::parse_label;

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("request to vision backend failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("vision backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("vision backend did not answer within {0:?}")]
    Timeout(Duration),
    #[error("model refused to classify: {0}")]
    Refused(String),
    #[error("vision backend returned no text")]
    EmptyResponse,
    #[error("answer is not a JSON object: {0}")]
    Malformed(String),
    #[error("answer has no \"content\" key")]
    MissingKey,
    #[error("unrecognized content value: {0}")]
    UnrecognizedValue(String),
}

/// A vision model endpoint that answers the ad/show prompt for one image.
///
/// Implementations return the model's raw text; turning it into a label is
/// the `Classifier`'s job so every backend behaves the same on bad output.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn complete(&self, jpeg_base64: &str) -> Result<String, ClassificationError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Classifies frames as ad or show. Never fails: any transport, backend, or
/// parse problem yields `Label::Unknown`.
pub struct Classifier {
    backend: Box<dyn VisionBackend>,
    timeout: Duration,
}

impl Classifier {
    pub fn new(backend: Box<dyn VisionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassificationError> {
        let timeout = config.timeout();
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(ClassificationError::Client)?;

        let backend: Box<dyn VisionBackend> = match config.backend {
            Backend::Hosted => Box::new(HostedBackend::new(
                http,
                &config.hosted,
                config.prompt.clone(),
            )),
            Backend::Local => Box::new(LocalBackend::new(http, &config.local, config.prompt.clone())),
        };
        Ok(Self::new(backend, timeout))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn classify(&self, jpeg: &[u8]) -> Label {
        match self.try_classify(jpeg).await {
            Ok(label) => label,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "classification failed, treating as unknown");
                Label::Unknown
            }
        }
    }

    async fn try_classify(&self, jpeg: &[u8]) -> Result<Label, ClassificationError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
        let raw = tokio::time::timeout(self.timeout, self.backend.complete(&encoded))
            .await
            .map_err(|_| ClassificationError::Timeout(self.timeout))??;
        debug!(backend = self.backend.name(), raw, "raw model answer");
        parse_label(&raw)
    }
}

use admute_common::config::LocalConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ClassificationError, VisionBackend};

/// Locally served model with an Ollama-style `/api/generate` endpoint.
pub struct LocalBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: [&'a str; 1],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl LocalBackend {
    pub fn new(http: reqwest::Client, config: &LocalConfig, prompt: String) -> Self {
        Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            prompt,
        }
    }
}

#[async_trait]
impl VisionBackend for LocalBackend {
    async fn complete(&self, jpeg_base64: &str) -> Result<String, ClassificationError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: [jpeg_base64],
            stream: false,
        };

        let resp = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClassificationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let generated: GenerateResponse = resp.json().await?;
        if generated.response.trim().is_empty() {
            return Err(ClassificationError::EmptyResponse);
        }
        Ok(generated.response)
    }

    fn name(&self) -> &str {
        "local"
    }
}

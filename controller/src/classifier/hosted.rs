use admute_common::config::HostedConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ClassificationError, VisionBackend};

/// Chat-completions style hosted API. The frame travels as a JPEG data URI
/// next to the instruction prompt.
pub struct HostedBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl HostedBackend {
    pub fn new(http: reqwest::Client, config: &HostedConfig, prompt: String) -> Self {
        Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            prompt,
        }
    }

    fn request_body(&self, jpeg_base64: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": self.prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{jpeg_base64}") }
                    }
                ]
            }],
            "max_tokens": 50
        })
    }
}

#[async_trait]
impl VisionBackend for HostedBackend {
    async fn complete(&self, jpeg_base64: &str) -> Result<String, ClassificationError> {
        let mut req = self.http.post(&self.endpoint).json(&self.request_body(jpeg_base64));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClassificationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = resp.json().await?;
        let message = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(ClassificationError::EmptyResponse)?;

        if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
            return Err(ClassificationError::Refused(refusal));
        }
        message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(ClassificationError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "hosted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1/chat/completions")
    }

    fn backend(endpoint: String) -> HostedBackend {
        let config = HostedConfig {
            endpoint,
            model: "gpt-4o-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            api_key: Some("sk-test".into()),
        };
        HostedBackend::new(reqwest::Client::new(), &config, "is it an ad?".into())
    }

    fn answer(body: serde_json::Value) -> Router {
        Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        )
    }

    #[tokio::test]
    async fn sends_prompt_image_and_key() {
        let seen: Arc<Mutex<Option<(String, serde_json::Value)>>> = Arc::default();
        let seen_in_handler = Arc::clone(&seen);
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let seen = Arc::clone(&seen_in_handler);
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    *seen.lock().unwrap() = Some((auth, body));
                    Json(json!({
                        "choices": [{ "message": { "role": "assistant", "content": "{\"content\": \"ad\"}" } }]
                    }))
                }
            }),
        );
        let backend = backend(serve(app).await);

        let text = backend.complete("QUJD").await.unwrap();
        assert_eq!(text, "{\"content\": \"ad\"}");

        let (auth, body) = seen.lock().unwrap().take().unwrap();
        assert_eq!(auth, "Bearer sk-test");
        assert_eq!(body["model"], "gpt-4o-mini");
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "is it an ad?");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
    }

    #[tokio::test]
    async fn refusal_is_an_error() {
        let app = answer(json!({
            "choices": [{ "message": { "content": null, "refusal": "I can't help with that." } }]
        }));
        let backend = backend(serve(app).await);
        assert!(matches!(
            backend.complete("QUJD").await,
            Err(ClassificationError::Refused(_))
        ));
    }

    #[tokio::test]
    async fn no_choices_is_empty() {
        let backend = backend(serve(answer(json!({ "choices": [] }))).await);
        assert!(matches!(
            backend.complete("QUJD").await,
            Err(ClassificationError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limited") }),
        );
        let backend = backend(serve(app).await);
        match backend.complete("QUJD").await {
            Err(ClassificationError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }
}

use crate::{
    api::{ChatCompletionRequest, ChatCompletionResponse},
    image::{encode_data_url, image_mime, load_image},
};
use anyhow::{Context, bail};
use std::{
    path::Path,
    time::{Duration, Instant},
};
use tracing::debug;

pub const LICENSE_PLATE_PROMPT: &str = "What is the license plate number shown in this image? \
Respond only with the plate number without any additional text or explanation.";

const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";

#[derive(Debug, Clone)]
pub struct VlmClientConfig {
    pub base_url: String,
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
}

/// Reply of the model for one image.
#[derive(Debug, Clone)]
pub struct VlmReply {
    pub raw_text: String,
    pub request_time: Duration,
}

/// Client for an OpenAI compatible chat completion endpoint such as LM Studio.
pub struct VlmClient {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    config: VlmClientConfig,
}

impl VlmClient {
    pub fn new(config: VlmClientConfig) -> anyhow::Result<Self> {
        // A trailing slash keeps any path prefix of the base url when joining.
        let base_url = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };
        let endpoint = reqwest::Url::parse(&base_url)
            .with_context(|| format!("Invalid inference url: {}", config.base_url))?
            .join(CHAT_COMPLETIONS_PATH)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Sends one image to the model and returns its trimmed reply text.
    pub async fn read_plate(&self, image_path: &Path) -> anyhow::Result<VlmReply> {
        let image_data = load_image(image_path)?;
        let data_url = encode_data_url(&image_data, &image_mime(image_path));
        self.complete(data_url).await
    }

    pub async fn complete(&self, image_data_url: String) -> anyhow::Result<VlmReply> {
        let request = ChatCompletionRequest::license_plate(
            &self.config.model,
            &self.config.prompt,
            image_data_url,
            self.config.max_tokens,
            self.config.temperature,
        );
        debug!(?request, endpoint = %self.endpoint, "Sending chat completion request");

        let request_start_time = Instant::now();
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {e}>"));
            bail!("Request failed with status {status}: {body}");
        }

        let response = response
            .json::<ChatCompletionResponse>()
            .await
            .context("Failed to parse chat completion response")?;
        let request_time = request_start_time.elapsed();
        let raw_text = response.first_content()?;
        debug!(%raw_text, ?request_time, "Model replied");

        Ok(VlmReply {
            raw_text,
            request_time,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    pub(crate) fn test_config(base_url: String) -> VlmClientConfig {
        VlmClientConfig {
            base_url,
            model: "test-model".to_string(),
            prompt: LICENSE_PLATE_PROMPT.to_string(),
            max_tokens: 100,
            temperature: 0.1,
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Starts a mock chat completion server. `reply` maps the request body to
    /// a status and the reply text.
    pub(crate) async fn spawn_mock_server<F>(reply: F) -> String
    where
        F: Fn(&Value) -> (StatusCode, String) + Clone + Send + Sync + 'static,
    {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<Value>| {
                let reply = reply.clone();
                async move {
                    let (status, text) = reply(&body);
                    (
                        status,
                        Json(json!({
                            "id": "chatcmpl-1",
                            "model": body["model"],
                            "choices": [{
                                "index": 0,
                                "message": {"role": "assistant", "content": text},
                                "finish_reason": "stop"
                            }]
                        })),
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn endpoint_keeps_path_prefix() {
        let client = VlmClient::new(test_config("http://localhost:1234".into())).unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "http://localhost:1234/v1/chat/completions"
        );
        let client = VlmClient::new(test_config("http://host/proxy".into())).unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "http://host/proxy/v1/chat/completions"
        );
        assert!(VlmClient::new(test_config("not a url".into())).is_err());
    }

    #[tokio::test]
    async fn sends_image_and_prompt() {
        let seen = Arc::new(Mutex::new(None));
        let seen_in_server = seen.clone();
        let base_url = spawn_mock_server(move |body| {
            *seen_in_server.lock().unwrap() = Some(body.clone());
            (StatusCode::OK, "  \"B 1234 XYZ\"  ".to_string())
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("car.png");
        std::fs::write(&image, b"ABC").unwrap();

        let client = VlmClient::new(test_config(base_url)).unwrap();
        let reply = client.read_plate(&image).await.unwrap();
        assert_eq!(reply.raw_text, "\"B 1234 XYZ\"");

        let body = seen.lock().unwrap().take().unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["max_tokens"], 100);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], LICENSE_PLATE_PROMPT);
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let base_url = spawn_mock_server(|_| {
            (StatusCode::SERVICE_UNAVAILABLE, "model not loaded".to_string())
        })
        .await;
        let client = VlmClient::new(test_config(base_url)).unwrap();
        let err = client
            .complete("data:image/jpeg;base64,QUJD".to_string())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("model not loaded"));
    }
}

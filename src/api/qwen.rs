use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::ImageSynthesizer;
use crate::error::SynthesisError;

const DEFAULT_BASE_URL: &str = "https://dashscope-intl.aliyuncs.com/api/v1";
const IMAGE_SYNTHESIS_PATH: &str = "/services/aigc/text2image/image-synthesis";
const TASKS_PATH: &str = "/tasks";

#[derive(Debug, Clone)]
pub struct QwenConfig {
    pub api_key: String,
    /// DashScope API root, e.g. `https://dashscope.aliyuncs.com/api/v1`
    pub base_url: String,
    pub model: String,
    pub style: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl QwenConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "wanx-v1".to_string(),
            style: "<photography>".to_string(),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            max_polls: 60,
        }
    }

    /// Reads `DASHSCOPE_API_KEY` and optionally `DASHSCOPE_BASE_URL`.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("DASHSCOPE_API_KEY").ok()?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("DASHSCOPE_BASE_URL") {
            config.base_url = base_url;
        }
        Some(config)
    }
}

#[derive(Debug, Clone)]
pub struct QwenClient {
    config: QwenConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    output: ImageOutput,
}

#[derive(Debug, Deserialize)]
struct ImageOutput {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct ImageTaskResponse {
    output: ImageTaskOutput,
}

#[derive(Debug, Deserialize)]
struct ImageTaskOutput {
    task_status: String,
    results: Option<Vec<ImageResult>>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResult {
    url: Option<String>,
}

impl QwenClient {
    pub fn new(config: QwenConfig) -> Result<Self, SynthesisError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn submit_task(&self, prompt: &str, size: (u32, u32)) -> Result<String, SynthesisError> {
        let request_body = json!({
            "model": self.config.model,
            "input": {
                "prompt": prompt
            },
            "parameters": {
                "style": self.config.style,
                "size": format!("{}*{}", size.0, size.1),
                "n": 1
            }
        });

        let response = self
            .client
            .post(self.endpoint(IMAGE_SYNTHESIS_PATH))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .header("X-DashScope-Async", "enable")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Api(format!(
                "image synthesis request rejected (HTTP {}): {}",
                status, error_text
            )));
        }

        let task: ImageGenerationResponse = response.json().await?;
        Ok(task.output.task_id)
    }

    async fn wait_for_image_task(&self, task_id: &str) -> Result<String, SynthesisError> {
        let get_url = format!("{}/{}", self.endpoint(TASKS_PATH), task_id);

        for attempt in 0..self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval).await;

            let response = self
                .client
                .get(&get_url)
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                warn!(task_id, %status, "failed to query image task: {}", error_text);
                continue;
            }

            let task: ImageTaskResponse = response.json().await?;
            match task.output.task_status.as_str() {
                "SUCCEEDED" => {
                    return task
                        .output
                        .results
                        .unwrap_or_default()
                        .into_iter()
                        .find_map(|r| r.url)
                        .ok_or_else(|| SynthesisError::Api("no image URL in task result".to_string()));
                }
                "FAILED" | "CANCELED" | "UNKNOWN" => {
                    return Err(SynthesisError::Api(format!(
                        "image task {} ended as {}: {}",
                        task_id,
                        task.output.task_status,
                        task.output.message.unwrap_or_default()
                    )));
                }
                other => {
                    debug!(task_id, status = other, attempt = attempt + 1, "image task pending");
                }
            }
        }

        Err(SynthesisError::Api(format!(
            "image task {} did not finish after {} polls",
            task_id, self.config.max_polls
        )))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, SynthesisError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SynthesisError::Api(format!(
                "image download failed with HTTP {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ImageSynthesizer for QwenClient {
    async fn synthesize_image(&self, prompt: &str, size: (u32, u32)) -> Result<Vec<u8>, SynthesisError> {
        let task_id = self.submit_task(prompt, size).await?;
        info!(task_id = %task_id, "image synthesis task submitted");

        let image_url = self.wait_for_image_task(&task_id).await?;
        debug!(task_id = %task_id, url = %image_url, "downloading synthesized image");

        self.download(&image_url).await
    }

    fn name(&self) -> &'static str {
        "dashscope-wanx"
    }
}

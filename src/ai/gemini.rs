use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::{GenerateRequest, Generation, TextGenerator};
use crate::error::TransportError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const MAX_ERROR_BODY_CHARS: usize = 500;

pub struct GeminiBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiBackend {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("infralens/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, TransportError> {
        let response = request
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        if (200..300).contains(&status) {
            return Ok(body);
        }
        Err(classify_failure(status, retry_after, &body))
    }
}

#[async_trait]
impl TextGenerator for GeminiBackend {
    async fn list_models(&self) -> Result<Vec<String>, TransportError> {
        let url = format!("{}/models", self.base_url);
        let body = self
            .send(self.http.get(url).query(&[("pageSize", "1000")]))
            .await?;
        let list: ModelList =
            serde_json::from_str(&body).map_err(|err| TransportError::Decode(err.to_string()))?;
        Ok(list.models.into_iter().map(|m| m.name).collect())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, TransportError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let payload = GenerateContentBody {
            contents: vec![ContentOut {
                role: "user",
                parts: vec![PartOut {
                    text: &request.prompt,
                }],
            }],
            generation_config: WireGenerationConfig {
                temperature: request.config.temperature,
                max_output_tokens: request.config.max_output_tokens,
            },
        };
        debug!(model = %request.model, prompt_chars = request.prompt.len(), "generateContent");
        let body = self.send(self.http.post(url).json(&payload)).await?;
        decode_generation(&body)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: Vec<ContentOut<'a>>,
    generation_config: WireGenerationConfig,
}

#[derive(Serialize)]
struct ContentOut<'a> {
    role: &'static str,
    parts: Vec<PartOut<'a>>,
}

#[derive(Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartIn>,
}

#[derive(Deserialize)]
struct PartIn {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

fn decode_generation(body: &str) -> Result<Generation, TransportError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(|err| TransportError::Decode(err.to_string()))?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .ok_or_else(|| TransportError::Decode("response contained no candidates".to_string()))?;

    let usage = response.usage_metadata.unwrap_or_default();
    Ok(Generation {
        text,
        input_tokens: usage.prompt_token_count,
        output_tokens: usage.candidates_token_count,
    })
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after(value)
}

/// Only the delta-seconds form is understood.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn classify_failure(status: u16, retry_after: Option<Duration>, body: &str) -> TransportError {
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
        return TransportError::RateLimited { retry_after };
    }
    let mut body: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
    if body.is_empty() {
        body = "<empty body>".to_string();
    }
    TransportError::Status { status, body }
}

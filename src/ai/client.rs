use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{AiError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub config: GenerationConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>, TransportError>;
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    // D, 2D, 4D, ... capped at max_delay
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct AiClient {
    backend: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    generation: GenerationConfig,
}

impl AiClient {
    pub fn new(backend: Arc<dyn TextGenerator>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            generation: GenerationConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub async fn select_model(
        &self,
        preferred: Option<&str>,
        fallbacks: &[String],
    ) -> Result<String, AiError> {
        let available: Vec<String> = self
            .backend
            .list_models()
            .await?
            .iter()
            .map(|m| normalize_model(m).to_string())
            .collect();
        debug!(count = available.len(), "listed available models");

        let preferred = preferred.map(normalize_model).filter(|m| !m.is_empty());
        if let Some(model) = preferred {
            if available.iter().any(|m| m == model) {
                return Ok(model.to_string());
            }
            warn!(model, "preferred model is not available; trying fallbacks");
        }

        for candidate in fallbacks {
            let candidate = normalize_model(candidate);
            if available.iter().any(|m| m == candidate) {
                return Ok(candidate.to_string());
            }
        }

        Err(AiError::NoUsableModel {
            preferred: preferred.unwrap_or("<none>").to_string(),
            available: available.len(),
        })
    }

    pub async fn complete(&self, model: &str, prompt: &str) -> Result<Completion, AiError> {
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            config: self.generation,
        };
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.backend.generate(&request).await {
                Ok(generation) => {
                    return Ok(Completion {
                        text: generation.text,
                        input_tokens: generation.input_tokens,
                        output_tokens: generation.output_tokens,
                        attempts: attempt,
                    });
                }
                Err(TransportError::RateLimited { retry_after }) => {
                    if attempt >= max_attempts {
                        warn!(model, attempts = attempt, "giving up after repeated rate limits");
                        return Err(AiError::RetriesExhausted { attempts: attempt });
                    }
                    let mut delay = self.retry.delay_for(attempt);
                    if let Some(hint) = retry_after {
                        delay = delay.max(hint.min(self.retry.max_delay));
                    }
                    debug!(model, attempt, delay_ms = delay.as_millis() as u64, "rate limited; backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn normalize_model(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix("models/").unwrap_or(name)
}

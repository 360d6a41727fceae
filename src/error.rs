use std::time::Duration;

use thiserror::Error;

/// The declaration graph could not be read at all.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("template root must be a JSON object")]
    NotAnObject,
    #[error("`Resources` must be a JSON object")]
    ResourcesNotAnObject,
    #[error("resource `{id}` is malformed: {reason}")]
    MalformedResource { id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("property `{path}` has unexpected shape (expected {expected})")]
pub struct RuleError {
    pub path: String,
    pub expected: &'static str,
}

impl RuleError {
    pub fn shape(path: impl Into<String>, expected: &'static str) -> Self {
        Self {
            path: path.into(),
            expected,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("rate limited by the AI service")]
    RateLimited { retry_after: Option<Duration> },
    #[error("AI service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("AI service request failed: {0}")]
    Network(String),
    #[error("AI service response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Error)]
pub enum AiError {
    #[error("AI service still rate limited after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("no usable model (preferred: {preferred}, available: {available})")]
    NoUsableModel { preferred: String, available: usize },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed AI response: {0}")]
    MalformedResponse(String),
}

impl AiError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        AiError::MalformedResponse(reason.into())
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, AiError::MalformedResponse(_))
    }
}

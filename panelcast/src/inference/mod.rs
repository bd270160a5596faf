//! Remote inference boundary.
//!
//! Stages talk to the model through [`InferenceClient`]; every call passes
//! through the shared [`AdmissionGate`] first.

mod gate;
#[cfg(feature = "http")]
mod openai;

pub use gate::{AdmissionGate, AdmissionPermit, GateConfig};
#[cfg(feature = "http")]
pub use openai::{OpenAiClient, OpenAiConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::core::StageName;

/// An image attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// MIME type such as `image/png`.
    pub media_type: String,
    /// Raw image bytes.
    pub data: Vec<u8>,
}

impl ImagePayload {
    /// Creates an image payload.
    #[must_use]
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            data,
        }
    }
}

/// Hint describing the JSON shape the response should take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseShape {
    /// Shape name, also used in error messages.
    pub name: String,
    /// Example or schema of the expected object.
    pub example: serde_json::Value,
}

/// A single inference call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Stage issuing the request.
    pub stage: StageName,
    /// System instruction.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    /// Attached images, possibly empty.
    pub images: Vec<ImagePayload>,
    /// Expected response shape.
    pub response_shape: ResponseShape,
    /// Output token ceiling.
    pub max_output_tokens: u32,
}

impl InferenceRequest {
    /// Creates a text-only request.
    #[must_use]
    pub fn new(
        stage: StageName,
        system: impl Into<String>,
        prompt: impl Into<String>,
        response_shape: ResponseShape,
    ) -> Self {
        Self {
            stage,
            system: system.into(),
            prompt: prompt.into(),
            images: Vec::new(),
            response_shape,
            max_output_tokens: 2_000,
        }
    }

    /// Attaches images.
    #[must_use]
    pub fn with_images(mut self, images: Vec<ImagePayload>) -> Self {
        self.images = images;
        self
    }

    /// Sets the output token ceiling.
    #[must_use]
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }
}

/// The model's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// Response text.
    pub text: String,
    /// Model that answered.
    #[serde(default)]
    pub model: String,
    /// Prompt tokens billed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    /// Completion tokens billed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}

impl InferenceResponse {
    /// Creates a response with only text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: String::new(),
            input_tokens: None,
            output_tokens: None,
        }
    }

    /// Total tokens billed.
    #[must_use]
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }
}

/// Failures an inference call can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    /// The call did not complete in time.
    #[error("inference call timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint asked us to slow down.
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {d:?})")).unwrap_or_default())]
    RateLimited {
        /// Server-provided wait hint.
        retry_after: Option<Duration>,
    },

    /// The endpoint rejected the request itself.
    #[error("request rejected: {0}")]
    MalformedRequest(String),

    /// Any other upstream or transport failure.
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl InferenceError {
    /// Returns true for failures worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::MalformedRequest(_))
    }

    /// Server-provided wait hint, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A remote model that answers inference requests.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Performs one inference call.
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError>;
}

//! Errors raised while checking stage payloads against their contracts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A payload or predecessor artifact lacks the shape a stage requires.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}", render(.field.as_deref(), .message))]
pub struct ContractViolation {
    /// Dotted path of the offending field, when known.
    pub field: Option<String>,
    /// What is wrong.
    pub message: String,
}

fn render(field: Option<&str>, message: &str) -> String {
    match field {
        Some(field) => format!("contract violation at '{field}': {message}"),
        None => format!("contract violation: {message}"),
    }
}

impl ContractViolation {
    /// Creates a violation that is not tied to a single field.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    /// Creates a violation for a specific field.
    #[must_use]
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Prefixes the field path, used when a nested check bubbles up.
    #[must_use]
    pub fn within(mut self, parent: &str) -> Self {
        self.field = Some(match self.field.take() {
            Some(inner) => format!("{parent}.{inner}"),
            None => parent.to_string(),
        });
        self
    }
}

/// A model response could not be turned into the expected payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedResponse {
    /// The response held no JSON object.
    #[error("response contains no JSON object")]
    NoJson,

    /// JSON was found but did not deserialize into the payload type.
    #[error("response JSON does not match '{shape}': {detail}")]
    Shape {
        /// Name of the expected shape.
        shape: String,
        /// Deserializer message.
        detail: String,
    },

    /// The payload deserialized but broke a contract rule.
    #[error("{0}")]
    Contract(#[from] ContractViolation),
}

impl MalformedResponse {
    /// Creates a shape mismatch error.
    #[must_use]
    pub fn shape(shape: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Shape {
            shape: shape.into(),
            detail: detail.into(),
        }
    }
}

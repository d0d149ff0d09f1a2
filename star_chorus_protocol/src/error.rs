// Error body returned in place of a compose response.
//
// Every failure carries a stable code token alongside its HTTP-style status.
// Validation errors attach field-level details; rate limiting attaches a
// retry-after hint.

use serde::{Deserialize, Serialize};

pub const VALIDATION_ERROR: &str = "VNEXT_VALIDATION_ERROR";
pub const QUALITY_EXHAUSTED: &str = "VNEXT_QUALITY_EXHAUSTED";
pub const RATE_LIMITED: &str = "VNEXT_RATE_LIMITED";
pub const COMPOSE_ERROR: &str = "VNEXT_COMPOSE_ERROR";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// One invalid request field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            message: message.into(),
        }
    }
}

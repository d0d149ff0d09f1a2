// Compose failures and their wire form.
//
// `ComposeError` is the only error type that leaves the composer. Typed
// failures from the stages below keep their identity (a quality exhaustion
// stays a 422 with its diagnostics); anything else is folded into
// `Internal`, the generic "Compose API error".

use serde_json::json;
use star_chorus_music::cascade::PlanError;
use star_chorus_protocol::{
    COMPOSE_ERROR, ErrorBody, FieldError, QUALITY_EXHAUSTED, RATE_LIMITED, VALIDATION_ERROR,
};
use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("invalid compose request: {message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("quality exhausted: {0}")]
    QualityExhausted(PlanError),
    #[error("model unavailable: {0}")]
    Model(#[from] ModelError),
    #[error("Compose API error: {0}")]
    Internal(String),
}

impl From<PlanError> for ComposeError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::BelowThreshold { .. } => ComposeError::QualityExhausted(err),
            PlanError::EmptyCandidates => ComposeError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ComposeError {
    fn from(err: serde_json::Error) -> Self {
        ComposeError::Internal(err.to_string())
    }
}

impl ComposeError {
    pub fn validation(message: impl Into<String>, details: Vec<FieldError>) -> Self {
        ComposeError::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ComposeError::Validation { .. } => 400,
            ComposeError::RateLimited { .. } => 429,
            ComposeError::QualityExhausted(err) => err.status_code(),
            ComposeError::Model(_) | ComposeError::Internal(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ComposeError::Validation { .. } => VALIDATION_ERROR,
            ComposeError::RateLimited { .. } => RATE_LIMITED,
            ComposeError::QualityExhausted(_) => QUALITY_EXHAUSTED,
            ComposeError::Model(_) | ComposeError::Internal(_) => COMPOSE_ERROR,
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        let details = match self {
            ComposeError::Validation { details, .. } => serde_json::to_value(details).ok(),
            ComposeError::QualityExhausted(PlanError::BelowThreshold { floor, diagnostics }) => {
                let scores: Vec<_> = diagnostics
                    .iter()
                    .map(|c| json!({ "index": c.index, "score": c.score, "vector": c.vector }))
                    .collect();
                Some(json!({ "floor": floor, "candidates": scores }))
            }
            _ => None,
        };
        let retry_after_secs = match self {
            ComposeError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        ErrorBody {
            error: self.to_string(),
            code: self.error_code().to_string(),
            status: self.status_code(),
            details,
            retry_after_secs,
        }
    }
}

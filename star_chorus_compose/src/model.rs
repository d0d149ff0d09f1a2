// Student model seam and artifact loading.
//
// The pipeline only needs a function from the 16 control features to a 6-dim
// plan vector in [0, 1]. `StudentModel` is that seam. `LinearStudentModel`
// is the in-process implementation: a 6x16 weight matrix plus bias, clamped.
//
// Model artifacts are JSON files pinned by SHA-256. `ModelLoader` verifies
// the primary artifact, and on an integrity mismatch warns and rolls back
// exactly once to the fallback. A fallback that also fails is fatal.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use star_chorus_music::planner::{ControlVector, PLAN_DIMS};
use thiserror::Error;
use tracing::{info, warn};

use crate::features::{CONTROL_FEATURE_DIMS, ControlFeatures};
use crate::hashing::{DIGEST_PREFIX, sha256_hex};

pub const REFERENCE_MODEL_VERSION: &str = "student-linear-v1";

pub trait StudentModel: Send + Sync {
    fn version(&self) -> &str;
    fn infer(&self, features: &ControlFeatures) -> ControlVector;
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model {path} failed integrity check: expected {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("model artifact is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model artifact has bad shape: {0}")]
    Shape(String),
    #[error("cannot read model artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// A linear map from control features to plan dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearStudentModel {
    pub version: String,
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl LinearStudentModel {
    /// Shaped identity: each plan dimension follows its control with a slight
    /// pull toward the middle, and syncopation leans on aspect tension.
    pub fn reference() -> Self {
        // Control feature slots feeding each plan dimension:
        // arc, density, tempo, step, syncopation, motif.
        const SOURCES: [usize; PLAN_DIMS] = [0, 1, 2, 3, 6, 7];
        let mut weights = vec![vec![0.0; CONTROL_FEATURE_DIMS]; PLAN_DIMS];
        for (row, source) in weights.iter_mut().zip(SOURCES) {
            row[source] = 0.9;
        }
        weights[4][12] = 0.05;
        LinearStudentModel {
            version: REFERENCE_MODEL_VERSION.into(),
            weights,
            bias: vec![0.05; PLAN_DIMS],
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.weights.len() != PLAN_DIMS || self.bias.len() != PLAN_DIMS {
            return Err(ModelError::Shape(format!(
                "expected {PLAN_DIMS} rows and biases, got {} and {}",
                self.weights.len(),
                self.bias.len()
            )));
        }
        if let Some(row) = self.weights.iter().find(|r| r.len() != CONTROL_FEATURE_DIMS) {
            return Err(ModelError::Shape(format!(
                "expected rows of {CONTROL_FEATURE_DIMS} weights, got {}",
                row.len()
            )));
        }
        if self.version.is_empty() {
            return Err(ModelError::Shape("empty version".into()));
        }
        Ok(())
    }
}

impl StudentModel for LinearStudentModel {
    fn version(&self) -> &str {
        &self.version
    }

    fn infer(&self, features: &ControlFeatures) -> ControlVector {
        let mut out = [0.5; PLAN_DIMS];
        for (d, slot) in out.iter_mut().enumerate() {
            let (Some(row), Some(bias)) = (self.weights.get(d), self.bias.get(d)) else {
                continue;
            };
            let y: f64 = row.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + bias;
            *slot = if y.is_finite() { y.clamp(0.0, 1.0) } else { 0.5 };
        }
        out
    }
}

/// Parse and shape-check an artifact already in memory.
pub fn load_from_bytes(bytes: &[u8]) -> Result<LinearStudentModel, ModelError> {
    let model: LinearStudentModel = serde_json::from_slice(bytes)?;
    model.validate()?;
    Ok(model)
}

/// One pinned artifact on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSource {
    pub path: PathBuf,
    /// Hex SHA-256, optionally `sha256:`-prefixed.
    pub sha256: String,
}

impl ModelSource {
    fn load(&self) -> Result<LinearStudentModel, ModelError> {
        let bytes = std::fs::read(&self.path)?;
        let expected = self.sha256.trim_start_matches(DIGEST_PREFIX).to_ascii_lowercase();
        let actual = sha256_hex(&bytes);
        if actual != expected {
            return Err(ModelError::Integrity {
                path: self.path.display().to_string(),
                expected,
                actual,
            });
        }
        load_from_bytes(&bytes)
    }
}

/// The model that was loaded and whether the fallback had to be used.
#[derive(Debug)]
pub struct LoadedModel {
    pub model: LinearStudentModel,
    pub rolled_back: bool,
}

#[derive(Debug, Clone)]
pub struct ModelLoader {
    pub primary: ModelSource,
    pub fallback: Option<ModelSource>,
}

impl ModelLoader {
    pub fn new(primary: ModelSource) -> Self {
        ModelLoader {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: ModelSource) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn load(&self) -> Result<LoadedModel, ModelError> {
        match self.primary.load() {
            Ok(model) => {
                info!(version = %model.version, path = %self.primary.path.display(), "model loaded");
                Ok(LoadedModel {
                    model,
                    rolled_back: false,
                })
            }
            Err(err @ ModelError::Integrity { .. }) => {
                let Some(fallback) = &self.fallback else {
                    return Err(err);
                };
                warn!(error = %err, fallback = %fallback.path.display(), "rolling back to fallback model");
                let model = fallback.load()?;
                info!(version = %model.version, "fallback model loaded");
                Ok(LoadedModel {
                    model,
                    rolled_back: true,
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// Write `model` as a JSON artifact and return its pinned source.
pub fn write_artifact(model: &LinearStudentModel, path: &Path) -> Result<ModelSource, ModelError> {
    let bytes = serde_json::to_vec_pretty(model)?;
    std::fs::write(path, &bytes)?;
    Ok(ModelSource {
        path: path.to_path_buf(),
        sha256: sha256_hex(&bytes),
    })
}

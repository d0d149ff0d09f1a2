// Compose messages: the request a client sends and the response envelope
// the pipeline returns.
//
// - `ComposeRequest`: camelCase JSON, every part optional. Mode-specific
//   parameter blocks keep their fields optional too, so a missing field is a
//   validation error raised by the pipeline (with field-level details) rather
//   than an opaque parse failure.
// - `ComposeResponse`: the response envelope. Field names follow the public
//   wire contract exactly, which is why the casing is mixed (`gate_report`
//   next to `chartHash`).
//
// The gate report is mirrored here as plain data so this crate stays
// independent of the music crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{AstroSummary, ComposeMode, ControlOverrides, ControlSurfacePayload};

/// Version tag of the explanation document format.
pub const EXPLANATION_SPEC: &str = "UnifiedSpecV1.1";

/// A compose request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComposeRequest {
    /// Missing mode means sandbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ComposeMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sky_params: Option<SkyParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_params: Option<OverlayParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compatibility_params: Option<CompatibilityParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controls: Option<ControlOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_override: Option<TestOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<RequestSeed>,
}

/// Point-in-time chart location.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkyParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// RFC 3339 timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
}

impl SkyParams {
    pub fn new(latitude: f64, longitude: f64, datetime: impl Into<String>) -> Self {
        SkyParams {
            latitude: Some(latitude),
            longitude: Some(longitude),
            datetime: Some(datetime.into()),
        }
    }
}

/// Natal and current chart locations for overlay mode.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natal_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natal_longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natal_datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_datetime: Option<String>,
}

impl OverlayParams {
    pub fn natal(&self) -> SkyParams {
        SkyParams {
            latitude: self.natal_latitude,
            longitude: self.natal_longitude,
            datetime: self.natal_datetime.clone(),
        }
    }

    pub fn current(&self) -> SkyParams {
        SkyParams {
            latitude: self.current_latitude,
            longitude: self.current_longitude,
            datetime: self.current_datetime.clone(),
        }
    }
}

/// Two charts and their precomputed compatibility score.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompatibilityParams {
    #[serde(rename = "chartA", skip_serializing_if = "Option::is_none")]
    pub chart_a: Option<SkyParams>,
    #[serde(rename = "chartB", skip_serializing_if = "Option::is_none")]
    pub chart_b: Option<SkyParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compatibility_score: Option<f64>,
}

/// Test-only switches.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestOverride {
    /// Force `calibrated.overall = false`.
    pub force_fail: bool,
}

/// Client-supplied seed; clients send either a string or a number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestSeed {
    Number(i64),
    Text(String),
}

impl RequestSeed {
    pub fn as_seed_string(&self) -> String {
        match self {
            RequestSeed::Number(n) => n.to_string(),
            RequestSeed::Text(s) => s.clone(),
        }
    }
}

// ── Response ──

/// One quality-gate threshold set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateFlagsBody {
    pub melody_arc: bool,
    pub melody_step_leap: bool,
    pub melody_narrative: bool,
    pub rhythm_diversity: bool,
    pub overall: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateReportBody {
    pub calibrated: GateFlagsBody,
    pub strict: GateFlagsBody,
    pub rule_quality_passed: bool,
    pub rule_quality_failing: Vec<String>,
    pub scores: BTreeMap<String, f64>,
    pub latency_ms: BTreeMap<String, f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioDescriptor {
    pub url: String,
    pub digest: String,
    pub latency_ms: u32,
}

/// Realized explanation text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextExplainer {
    pub short: String,
    pub long: String,
    pub bullets: Vec<String>,
    pub template_id: String,
    /// Always equal to the control-surface hash.
    pub seed: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextBody {
    pub blocks: TextExplainer,
    pub digest: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExplanationSection {
    pub title: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub spec: String,
    pub sections: Vec<ExplanationSection>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VizDescriptor {
    pub url: String,
    pub digest: String,
}

/// Independent `sha256:` digests of each artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hashes {
    pub control: String,
    pub audio: String,
    pub explanation: String,
    pub viz: Option<String>,
}

/// How the chosen plan was produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// e.g. "student+rerank".
    pub source: String,
    pub model_version: String,
    pub chosen_index: usize,
    pub candidate_scores: Vec<f64>,
    pub quality: f64,
    pub plan_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    pub model: String,
    pub encoder: String,
    #[serde(rename = "chartHash")]
    pub chart_hash: String,
    #[serde(rename = "featuresVersion")]
    pub features_version: String,
    pub gate: String,
    pub mapping_tables_version: String,
    pub timestamp: String,
    pub provenance: Provenance,
}

/// The compose response envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComposeResponse {
    pub controls: ControlSurfacePayload,
    pub astro: AstroSummary,
    pub gate_report: GateReportBody,
    pub audio: AudioDescriptor,
    pub text: TextBody,
    pub explanation: Explanation,
    pub viz: Option<VizDescriptor>,
    pub hashes: Hashes,
    pub artifacts: Artifacts,
}

// Core value types for the compose protocol.
//
// These are shared by the request and response messages and by the compose
// pipeline itself (`star_chorus_compose::controls`), which owns the logic for
// generating, clamping and hashing a `ControlSurfacePayload`. This crate only
// defines the shapes.

use serde::{Deserialize, Serialize};

/// Dominant classical element of a chart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    Fire,
    Earth,
    Air,
    Water,
}

impl Element {
    pub const ALL: [Element; 4] = [Element::Fire, Element::Earth, Element::Air, Element::Water];

    pub fn as_str(self) -> &'static str {
        match self {
            Element::Fire => "fire",
            Element::Earth => "earth",
            Element::Air => "air",
            Element::Water => "water",
        }
    }
}

/// Sign modality of a chart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Cardinal,
    Fixed,
    Mutable,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Cardinal, Modality::Fixed, Modality::Mutable];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Cardinal => "cardinal",
            Modality::Fixed => "fixed",
            Modality::Mutable => "mutable",
        }
    }
}

/// Compose input mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeMode {
    Sky,
    Overlay,
    Sandbox,
    Compatibility,
}

impl ComposeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ComposeMode::Sky => "sky",
            ComposeMode::Overlay => "overlay",
            ComposeMode::Sandbox => "sandbox",
            ComposeMode::Compatibility => "compatibility",
        }
    }
}

/// The control surface: every parameter that drives one composition.
///
/// `hash` is a content fingerprint of all other fields. It is only valid if
/// recomputed after the last field change; see
/// `star_chorus_compose::controls::rehash`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlSurfacePayload {
    pub arc_shape: f64,
    pub density_level: f64,
    pub tempo_norm: f64,
    pub step_bias: f64,
    /// 1..=6
    pub leap_cap: u8,
    /// 0..=7
    pub rhythm_template_id: u8,
    pub syncopation_bias: f64,
    pub motif_rate: f64,
    pub element_dominance: Element,
    pub aspect_tension: f64,
    pub modality: Modality,
    pub hash: String,
}

/// Partial control surface supplied by a sandbox request. Integer fields are
/// accepted as numbers and rounded; out-of-range values are clamped by the
/// pipeline. A supplied `hash` is ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arc_shape: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tempo_norm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_bias: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leap_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhythm_template_id: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syncopation_bias: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motif_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_dominance: Option<Element>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_tension: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modality: Option<Modality>,
}

impl ControlOverrides {
    pub fn is_empty(&self) -> bool {
        *self == ControlOverrides::default()
    }
}

/// Astro summary as exposed on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AstroSummary {
    pub element_dominance: Element,
    pub aspect_tension: f64,
    pub modality: Modality,
}

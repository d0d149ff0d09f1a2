// Overlay contrast between a natal and a current control surface.
//
// Only fields whose change reaches their threshold are described, each with
// a fixed increase or decrease phrase. No crossing, no phrases.

use star_chorus_protocol::ControlSurfacePayload;

/// Float slack so a delta of exactly the threshold counts as crossing.
const EPSILON: f64 = 1e-9;

struct ContrastRule {
    field: &'static str,
    threshold: f64,
    value: fn(&ControlSurfacePayload) -> f64,
    increase: &'static str,
    decrease: &'static str,
}

const CONTRAST_RULES: &[ContrastRule] = &[
    ContrastRule {
        field: "step_bias",
        threshold: 0.10,
        value: |p| p.step_bias,
        increase: "more stepwise motion",
        decrease: "more leaping motion",
    },
    ContrastRule {
        field: "syncopation_bias",
        threshold: 0.15,
        value: |p| p.syncopation_bias,
        increase: "more syncopation",
        decrease: "a steadier on-beat pulse",
    },
    ContrastRule {
        field: "density_level",
        threshold: 0.20,
        value: |p| p.density_level,
        increase: "a fuller texture",
        decrease: "a thinner texture",
    },
    ContrastRule {
        field: "leap_cap",
        threshold: 1.0,
        value: |p| p.leap_cap as f64,
        increase: "a wider interval range",
        decrease: "a narrower interval range",
    },
];

/// A field that crossed its threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ContrastDelta {
    pub field: &'static str,
    pub delta: f64,
    pub phrase: &'static str,
}

/// Signed deltas `current - natal` for every field that crossed.
pub fn contrast_deltas(natal: &ControlSurfacePayload, current: &ControlSurfacePayload) -> Vec<ContrastDelta> {
    CONTRAST_RULES
        .iter()
        .filter_map(|rule| {
            let delta = (rule.value)(current) - (rule.value)(natal);
            if !delta.is_finite() || delta.abs() + EPSILON < rule.threshold {
                return None;
            }
            Some(ContrastDelta {
                field: rule.field,
                delta,
                phrase: if delta > 0.0 { rule.increase } else { rule.decrease },
            })
        })
        .collect()
}

pub fn contrast_phrases(natal: &ControlSurfacePayload, current: &ControlSurfacePayload) -> Vec<&'static str> {
    contrast_deltas(natal, current).into_iter().map(|d| d.phrase).collect()
}

// Atoms: short semantic facts about a control surface.
//
// Each atom comes from an ordered bucket table. A table is a list of
// `(lower bound, templates)` rows scanned top to bottom; the first row whose
// bound the value reaches wins, and the last row's bound is -inf so every
// value lands somewhere. Rows with several templates pick one with
// `stable_index(seed + context)`, so wording varies between payloads but
// never between runs.
//
// A dominant planet, chosen by an ordered rule list over the controls, tints
// the movement and rhythm atoms. The element tint joins the color atom only
// when the dominant element carries more than 40% of the weight.

use serde::{Deserialize, Serialize};
use star_chorus_music::planner::RHYTHM_TEMPLATE_NAMES;
use star_chorus_prng::stable_index;
use star_chorus_protocol::{ControlSurfacePayload, Element, Modality};

use crate::ephemeris::ElementWeights;

/// Element weight above which the element tint is shown.
pub const ELEMENT_TINT_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainerAtoms {
    pub arc_desc: String,
    pub movement: String,
    pub rhythm_feel: String,
    pub density_desc: String,
    pub motif_desc: String,
    pub astro_color: String,
}

struct Bucket {
    min: f64,
    templates: &'static [&'static str],
}

const ARC_BUCKETS: &[Bucket] = &[
    Bucket {
        min: 0.6,
        templates: &["rise-peak-release arc", "arc that climbs, peaks and releases"],
    },
    Bucket {
        min: 0.4,
        templates: &["gentle wave", "softly undulating line"],
    },
    Bucket {
        min: 0.2,
        templates: &["plateau that holds its ground", "level, held contour"],
    },
    Bucket {
        min: f64::NEG_INFINITY,
        templates: &["mixed contour", "shifting, mixed shape"],
    },
];

const MOVEMENT_BUCKETS: &[Bucket] = &[
    Bucket {
        min: 0.7,
        templates: &["mostly stepwise motion", "smooth stepwise motion"],
    },
    Bucket {
        min: 0.4,
        templates: &["a mix of steps and leaps", "steps broken by occasional leaps"],
    },
    Bucket {
        min: f64::NEG_INFINITY,
        templates: &["wide, leaping motion", "bold leaps"],
    },
];

const RHYTHM_BUCKETS: &[Bucket] = &[
    Bucket {
        min: 0.6,
        templates: &["syncopated, off-beat pulse"],
    },
    Bucket {
        min: 0.3,
        templates: &["lightly syncopated groove", "groove with a few pushed accents"],
    },
    Bucket {
        min: f64::NEG_INFINITY,
        templates: &["steady on-beat pulse"],
    },
];

const DENSITY_BUCKETS: &[Bucket] = &[
    Bucket {
        min: 0.66,
        templates: &["dense, busy texture", "full texture"],
    },
    Bucket {
        min: 0.33,
        templates: &["balanced texture"],
    },
    Bucket {
        min: f64::NEG_INFINITY,
        templates: &["sparse, open texture", "airy texture"],
    },
];

const MOTIF_BUCKETS: &[Bucket] = &[
    Bucket {
        min: 0.6,
        templates: &["a motif that returns often", "a recurring hook"],
    },
    Bucket {
        min: 0.3,
        templates: &["a motif that returns now and then"],
    },
    Bucket {
        min: f64::NEG_INFINITY,
        templates: &["through-composed lines that rarely repeat"],
    },
];

fn lookup(table: &[Bucket], value: f64, seed: &str, context: &str) -> &'static str {
    let value = if value.is_finite() { value } else { 0.0 };
    let Some(bucket) = table.iter().find(|b| value >= b.min) else {
        return "";
    };
    let index = stable_index(&format!("{seed}{context}"), bucket.templates.len());
    bucket.templates.get(index).copied().unwrap_or("")
}

// ── Planet tint ──

/// Planet tint applied to movement and rhythm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanetTint {
    pub planet: &'static str,
    pub movement: &'static str,
    pub rhythm: &'static str,
}

struct PlanetRule {
    applies: fn(&ControlSurfacePayload) -> bool,
    tint: PlanetTint,
}

const PLANET_RULES: &[PlanetRule] = &[
    PlanetRule {
        applies: |p| p.aspect_tension >= 0.7,
        tint: PlanetTint {
            planet: "Mars",
            movement: "pushed by Mars",
            rhythm: "with Martian urgency",
        },
    },
    PlanetRule {
        applies: |p| p.syncopation_bias >= 0.6,
        tint: PlanetTint {
            planet: "Uranus",
            movement: "with Uranian surprises",
            rhythm: "full of Uranian jolts",
        },
    },
    PlanetRule {
        applies: |p| p.step_bias >= 0.75,
        tint: PlanetTint {
            planet: "Saturn",
            movement: "kept in line by Saturn",
            rhythm: "with Saturnine patience",
        },
    },
    PlanetRule {
        applies: |p| p.motif_rate >= 0.7,
        tint: PlanetTint {
            planet: "Mercury",
            movement: "quick as Mercury",
            rhythm: "with Mercurial chatter",
        },
    },
    PlanetRule {
        applies: |p| p.density_level <= 0.3,
        tint: PlanetTint {
            planet: "Neptune",
            movement: "drifting under Neptune",
            rhythm: "dissolving in Neptune's haze",
        },
    },
    PlanetRule {
        applies: |p| p.arc_shape >= 0.75,
        tint: PlanetTint {
            planet: "Sun",
            movement: "lit by the Sun",
            rhythm: "with solar warmth",
        },
    },
];

/// First matching planet rule, if any.
pub fn dominant_planet(payload: &ControlSurfacePayload) -> Option<PlanetTint> {
    PLANET_RULES.iter().find(|rule| (rule.applies)(payload)).map(|rule| rule.tint)
}

// ── Color ──

fn element_phrase(element: Element) -> &'static str {
    match element {
        Element::Fire => "a fiery tint",
        Element::Earth => "an earthy tint",
        Element::Air => "an airy tint",
        Element::Water => "a watery tint",
    }
}

fn modality_phrase(modality: Modality) -> &'static str {
    match modality {
        Modality::Cardinal => "cardinal drive to begin things",
        Modality::Fixed => "fixed persistence",
        Modality::Mutable => "mutable flexibility",
    }
}

fn astro_color(payload: &ControlSurfacePayload, weights: &ElementWeights) -> String {
    let element = payload.element_dominance;
    if weights.get(element) > ELEMENT_TINT_THRESHOLD {
        format!("{} with {}", element_phrase(element), modality_phrase(payload.modality))
    } else {
        format!("a balanced blend of elements with {}", modality_phrase(payload.modality))
    }
}

/// Derive all six atoms. `seed` is the payload hash.
pub fn generate_atoms(payload: &ControlSurfacePayload, weights: &ElementWeights) -> ExplainerAtoms {
    let seed = payload.hash.as_str();
    let tint = dominant_planet(payload);

    let mut movement = lookup(MOVEMENT_BUCKETS, payload.step_bias, seed, "movement").to_string();
    let template = RHYTHM_TEMPLATE_NAMES
        .get(payload.rhythm_template_id as usize)
        .copied()
        .unwrap_or("free");
    let mut rhythm_feel = format!(
        "{} on a {} pattern",
        lookup(RHYTHM_BUCKETS, payload.syncopation_bias, seed, "rhythm"),
        template
    );
    if let Some(tint) = tint {
        movement = format!("{movement} {}", tint.movement);
        rhythm_feel = format!("{rhythm_feel} {}", tint.rhythm);
    }

    ExplainerAtoms {
        arc_desc: lookup(ARC_BUCKETS, payload.arc_shape, seed, "arc").to_string(),
        movement,
        rhythm_feel,
        density_desc: lookup(DENSITY_BUCKETS, payload.density_level, seed, "density").to_string(),
        motif_desc: lookup(MOTIF_BUCKETS, payload.motif_rate, seed, "motif").to_string(),
        astro_color: astro_color(payload, weights),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{apply_overrides, sandbox_default};
    use star_chorus_protocol::ControlOverrides;

    fn with(overrides: ControlOverrides) -> ControlSurfacePayload {
        apply_overrides(&sandbox_default(), &overrides)
    }

    #[test]
    fn arc_buckets_follow_boundaries() {
        let cases = [(0.6, 0), (0.95, 0), (0.59, 1), (0.4, 1), (0.39, 2), (0.2, 2), (0.19, 3), (0.0, 3)];
        for (value, bucket) in cases {
            let atom = lookup(ARC_BUCKETS, value, "s", "arc");
            assert!(ARC_BUCKETS[bucket].templates.contains(&atom), "{value} -> {atom}");
        }
        assert!(ARC_BUCKETS[3].templates.contains(&lookup(ARC_BUCKETS, f64::NAN, "s", "arc")));
    }

    #[test]
    fn atoms_are_deterministic() {
        let p = sandbox_default();
        let w = ElementWeights::favoring(p.element_dominance);
        assert_eq!(generate_atoms(&p, &w), generate_atoms(&p, &w));
    }

    #[test]
    fn first_matching_planet_wins() {
        let both = with(ControlOverrides {
            aspect_tension: Some(0.8),
            syncopation_bias: Some(0.9),
            ..Default::default()
        });
        assert_eq!(dominant_planet(&both).unwrap().planet, "Mars");
        let sync_only = with(ControlOverrides {
            syncopation_bias: Some(0.9),
            ..Default::default()
        });
        assert_eq!(dominant_planet(&sync_only).unwrap().planet, "Uranus");
        assert_eq!(dominant_planet(&sandbox_default()), None);
    }

    #[test]
    fn planet_tints_movement_and_rhythm() {
        let p = with(ControlOverrides {
            aspect_tension: Some(0.8),
            ..Default::default()
        });
        let atoms = generate_atoms(&p, &ElementWeights::uniform());
        assert!(atoms.movement.ends_with("pushed by Mars"));
        assert!(atoms.rhythm_feel.ends_with("with Martian urgency"));
        assert!(atoms.rhythm_feel.contains("push pattern"));
    }

    #[test]
    fn element_tint_needs_weight_above_threshold() {
        let p = sandbox_default();
        let strong = generate_atoms(&p, &ElementWeights::favoring(Element::Air));
        assert!(strong.astro_color.starts_with("an airy tint"));
        let even = generate_atoms(&p, &ElementWeights::uniform());
        assert!(even.astro_color.starts_with("a balanced blend"));
        let mut edge = ElementWeights::uniform();
        edge.air = 0.4;
        assert!(generate_atoms(&p, &edge).astro_color.starts_with("a balanced blend"));
    }
}

// Feature encoding.
//
// Two fixed-width encodings feed the pipeline:
// - `encode_features`: a 64-dim vector from an ephemeris snapshot. Its
//   digest is the chart hash reported in response artifacts.
// - `control_features`: a 16-dim vector from a control surface, which is
//   what the student model actually consumes.
//
// Both are total: every slot lands in [0, 1] and non-finite inputs become 0.

use star_chorus_protocol::{ControlSurfacePayload, Element, Modality};

use crate::ephemeris::{AspectType, EphemerisSnapshot, PLANETS};
use crate::hashing::sha256_hex;

pub const FEATURE_DIMS: usize = 64;
pub const CONTROL_FEATURE_DIMS: usize = 16;
pub const FEATURES_VERSION: &str = "feat-v1.0";

/// Aspect counts are divided by this and clamped.
const ASPECT_CAP: f64 = 10.0;

pub type FeatureVec = [f64; FEATURE_DIMS];
pub type ControlFeatures = [f64; CONTROL_FEATURE_DIMS];

// Slot offsets.
const PLANET_START: usize = 0;
const CUSP_START: usize = 10;
const ASPECT_START: usize = 22;
const ELEMENT_START: usize = 27;
const MOON_PHASE: usize = 31;
const TENSION: usize = 32;
const CLUSTER: usize = 33;

fn unit(x: f64) -> f64 {
    if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 }
}

fn degrees(x: f64) -> f64 {
    if x.is_finite() { unit(x.rem_euclid(360.0) / 360.0) } else { 0.0 }
}

/// Encode a snapshot. Missing planets and cusps leave their slots at 0;
/// slots 34..64 are reserved and always 0.
pub fn encode_features(snapshot: &EphemerisSnapshot) -> FeatureVec {
    let mut features = [0.0; FEATURE_DIMS];

    for (i, name) in PLANETS.iter().enumerate() {
        if let Some(p) = snapshot.planets.iter().find(|p| p.name == *name) {
            features[PLANET_START + i] = degrees(p.longitude);
        }
    }
    for (i, cusp) in snapshot.house_cusps.iter().take(12).enumerate() {
        features[CUSP_START + i] = degrees(*cusp);
    }

    let mut counts = [0usize; 5];
    for aspect in &snapshot.aspects {
        if let Some(slot) = AspectType::ALL.iter().position(|t| *t == aspect.aspect_type) {
            counts[slot] += 1;
        }
    }
    for (i, count) in counts.iter().enumerate() {
        features[ASPECT_START + i] = unit(*count as f64 / ASPECT_CAP);
    }

    let w = &snapshot.element_weights;
    for (i, value) in [w.fire, w.earth, w.air, w.water].into_iter().enumerate() {
        features[ELEMENT_START + i] = unit(value);
    }
    features[MOON_PHASE] = unit(snapshot.moon_phase);

    let hard = counts[2] + counts[4];
    features[TENSION] = unit(hard as f64 / ASPECT_CAP);
    features[CLUSTER] = cluster_density(snapshot);

    features
}

/// `1 - largest_gap / 360` over planet longitudes. Tight stelliums approach
/// 1; fewer than two planets give 0.
fn cluster_density(snapshot: &EphemerisSnapshot) -> f64 {
    let mut longitudes: Vec<f64> = snapshot
        .planets
        .iter()
        .map(|p| p.longitude)
        .filter(|l| l.is_finite())
        .map(|l| l.rem_euclid(360.0))
        .collect();
    if longitudes.len() < 2 {
        return 0.0;
    }
    longitudes.sort_by(f64::total_cmp);
    let mut largest_gap = 360.0 - longitudes[longitudes.len() - 1] + longitudes[0];
    for pair in longitudes.windows(2) {
        largest_gap = f64::max(largest_gap, pair[1] - pair[0]);
    }
    unit(1.0 - largest_gap / 360.0)
}

/// First 16 hex digits of SHA-256 over the encoded features.
pub fn feature_digest(features: &FeatureVec) -> String {
    let mut bytes = Vec::with_capacity(FEATURE_DIMS * 8);
    for value in features {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    sha256_hex(&bytes)[..16].to_string()
}

/// Control-surface features, in this order: the four shape knobs,
/// `leap_cap / 6`, `rhythm_template_id / 7`, syncopation, motif rate, a
/// one-hot element, tension, and a one-hot modality.
pub fn control_features(payload: &ControlSurfacePayload) -> ControlFeatures {
    let mut x = [0.0; CONTROL_FEATURE_DIMS];
    x[0] = unit(payload.arc_shape);
    x[1] = unit(payload.density_level);
    x[2] = unit(payload.tempo_norm);
    x[3] = unit(payload.step_bias);
    x[4] = unit(payload.leap_cap as f64 / 6.0);
    x[5] = unit(payload.rhythm_template_id as f64 / 7.0);
    x[6] = unit(payload.syncopation_bias);
    x[7] = unit(payload.motif_rate);
    let element_slot = Element::ALL
        .iter()
        .position(|e| *e == payload.element_dominance)
        .unwrap_or(0);
    x[8 + element_slot] = 1.0;
    x[12] = unit(payload.aspect_tension);
    let modality_slot = Modality::ALL.iter().position(|m| *m == payload.modality).unwrap_or(0);
    x[13 + modality_slot] = 1.0;
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::{Aspect, ElementWeights, EphemerisProvider, MockEphemeris, PlanetPosition, SkyPoint};

    fn empty_snapshot() -> EphemerisSnapshot {
        EphemerisSnapshot {
            timestamp: "2025-01-01T00:00:00Z".into(),
            timezone: "UTC".into(),
            latitude: 0.0,
            longitude: 0.0,
            house_system: "equal".into(),
            planets: Vec::new(),
            house_cusps: Vec::new(),
            aspects: Vec::new(),
            moon_phase: 0.0,
            element_weights: ElementWeights::uniform(),
        }
    }

    fn planet(name: &str, longitude: f64) -> PlanetPosition {
        PlanetPosition {
            name: name.into(),
            longitude,
            latitude: None,
            speed: None,
        }
    }

    fn aspect(aspect_type: AspectType) -> Aspect {
        Aspect {
            body_a: "Sun".into(),
            body_b: "Moon".into(),
            aspect_type,
            orb_degrees: 1.0,
        }
    }

    #[test]
    fn mock_snapshot_encodes_in_bounds() {
        let point = SkyPoint {
            latitude: 40.7128,
            longitude: -74.006,
            datetime: "2025-01-01T12:00:00Z".into(),
        };
        let features = encode_features(&MockEphemeris.snapshot(&point));
        assert!(features.iter().all(|x| (0.0..=1.0).contains(x)));
        assert!(features[34..].iter().all(|x| *x == 0.0));
        assert_eq!(features, encode_features(&MockEphemeris.snapshot(&point)));
    }

    #[test]
    fn non_finite_values_scrub_to_zero() {
        let mut snapshot = empty_snapshot();
        snapshot.planets = vec![planet("Sun", f64::NAN), planet("Moon", 90.0)];
        snapshot.moon_phase = f64::INFINITY;
        snapshot.element_weights.fire = f64::NAN;
        snapshot.house_cusps = vec![f64::NEG_INFINITY; 12];
        let features = encode_features(&snapshot);
        assert_eq!(features[0], 0.0);
        assert_eq!(features[1], 0.25);
        assert_eq!(features[MOON_PHASE], 0.0);
        assert_eq!(features[ELEMENT_START], 0.0);
        assert!(features[CUSP_START..CUSP_START + 12].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn aspect_counts_and_tension_are_capped() {
        let mut snapshot = empty_snapshot();
        snapshot.aspects = (0..12).map(|_| aspect(AspectType::Square)).collect();
        snapshot.aspects.push(aspect(AspectType::Trine));
        let features = encode_features(&snapshot);
        assert_eq!(features[ASPECT_START + 2], 1.0);
        assert_eq!(features[ASPECT_START + 3], 0.1);
        assert_eq!(features[TENSION], 1.0);
    }

    #[test]
    fn cluster_density_reflects_spread() {
        let mut tight = empty_snapshot();
        tight.planets = vec![planet("Sun", 10.0), planet("Moon", 20.0), planet("Mars", 30.0)];
        let mut spread = empty_snapshot();
        spread.planets = vec![planet("Sun", 0.0), planet("Moon", 120.0), planet("Mars", 240.0)];
        let tight_density = encode_features(&tight)[CLUSTER];
        let spread_density = encode_features(&spread)[CLUSTER];
        assert!((tight_density - 20.0 / 360.0).abs() < 1e-9);
        assert!((spread_density - 240.0 / 360.0).abs() < 1e-9);
        assert_eq!(encode_features(&empty_snapshot())[CLUSTER], 0.0);
    }

    #[test]
    fn feature_digest_is_short_and_sensitive() {
        let a = encode_features(&empty_snapshot());
        let mut b = a;
        b[5] = 0.5;
        assert_eq!(feature_digest(&a).len(), 16);
        assert_ne!(feature_digest(&a), feature_digest(&b));
    }

    #[test]
    fn control_features_one_hot() {
        let payload = ControlSurfacePayload {
            arc_shape: 0.6,
            density_level: 0.5,
            tempo_norm: 0.5,
            step_bias: 0.6,
            leap_cap: 6,
            rhythm_template_id: 7,
            syncopation_bias: 0.3,
            motif_rate: 0.5,
            element_dominance: Element::Air,
            aspect_tension: 0.4,
            modality: Modality::Mutable,
            hash: String::new(),
        };
        let x = control_features(&payload);
        assert_eq!(x[4], 1.0);
        assert_eq!(x[5], 1.0);
        assert_eq!(&x[8..12], &[0.0, 0.0, 1.0, 0.0]);
        assert_eq!(&x[13..16], &[0.0, 0.0, 1.0]);
    }
}

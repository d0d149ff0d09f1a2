// Control-surface generation.
//
// One `ControlSurfacePayload` drives each composition. This module builds it
// for every compose mode and owns its content hash:
//
// - sky: two independent seeded draws. The first turns the chart point into
//   an astro profile (element weights, tension, modality); the second turns
//   that profile into the eight musical controls.
// - overlay: two sky payloads, current and natal; the caller keeps both.
// - sandbox: a fixed default with client overrides merged on top.
// - compatibility: a field-wise blend of two sky payloads.
//
// Every constructor ends in `rehash`, so a payload leaving this module always
// carries the hash of its current fields.

use chrono::DateTime;
use serde_json::json;
use star_chorus_prng::{SeededRng, derive_seed};
use star_chorus_protocol::{
    AstroSummary, ControlOverrides, ControlSurfacePayload, Element, FieldError, Modality, SkyParams,
};

use crate::ephemeris::{ElementWeights, SkyPoint};
use crate::hashing::{round6, sha256_hex};

pub const LEAP_CAP_MIN: u8 = 1;
pub const LEAP_CAP_MAX: u8 = 6;
pub const RHYTHM_TEMPLATE_MAX: u8 = 7;

/// Compatibility scores above this keep chart A's element.
pub const COMPATIBILITY_ELEMENT_THRESHOLD: f64 = 0.7;

// ── Hashing ──

/// First 16 hex digits of SHA-256 over the canonical JSON of every field
/// except `hash`. Floats are hashed at full precision, so any change to a
/// field changes the hash.
pub fn compute_hash(payload: &ControlSurfacePayload) -> String {
    let view = json!({
        "arc_shape": payload.arc_shape,
        "density_level": payload.density_level,
        "tempo_norm": payload.tempo_norm,
        "step_bias": payload.step_bias,
        "leap_cap": payload.leap_cap,
        "rhythm_template_id": payload.rhythm_template_id,
        "syncopation_bias": payload.syncopation_bias,
        "motif_rate": payload.motif_rate,
        "element_dominance": payload.element_dominance,
        "aspect_tension": payload.aspect_tension,
        "modality": payload.modality,
    });
    sha256_hex(view.to_string().as_bytes())[..16].to_string()
}

/// Recompute `hash` from the current fields.
pub fn rehash(mut payload: ControlSurfacePayload) -> ControlSurfacePayload {
    payload.hash = compute_hash(&payload);
    payload
}

/// Whether `hash` matches the current fields.
pub fn hash_is_current(payload: &ControlSurfacePayload) -> bool {
    payload.hash == compute_hash(payload)
}

// ── Clamping ──

fn unit_or(x: f64, fallback: f64) -> f64 {
    if x.is_finite() { x.clamp(0.0, 1.0) } else { fallback }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Pull every field into its domain. Non-finite floats fall back to 0.5.
pub fn clamp_payload(mut payload: ControlSurfacePayload) -> ControlSurfacePayload {
    payload.arc_shape = unit_or(payload.arc_shape, 0.5);
    payload.density_level = unit_or(payload.density_level, 0.5);
    payload.tempo_norm = unit_or(payload.tempo_norm, 0.5);
    payload.step_bias = unit_or(payload.step_bias, 0.5);
    payload.leap_cap = payload.leap_cap.clamp(LEAP_CAP_MIN, LEAP_CAP_MAX);
    payload.rhythm_template_id = payload.rhythm_template_id.min(RHYTHM_TEMPLATE_MAX);
    payload.syncopation_bias = unit_or(payload.syncopation_bias, 0.5);
    payload.motif_rate = unit_or(payload.motif_rate, 0.5);
    payload.aspect_tension = unit_or(payload.aspect_tension, 0.5);
    payload
}

fn round_to_u8(x: f64, low: u8, high: u8) -> Option<u8> {
    x.is_finite().then(|| x.round().clamp(low as f64, high as f64) as u8)
}

// ── Sandbox ──

/// The sandbox starting point.
pub fn sandbox_default() -> ControlSurfacePayload {
    rehash(ControlSurfacePayload {
        arc_shape: 0.6,
        density_level: 0.5,
        tempo_norm: 0.5,
        step_bias: 0.6,
        leap_cap: 5,
        rhythm_template_id: 3,
        syncopation_bias: 0.3,
        motif_rate: 0.5,
        element_dominance: Element::Air,
        aspect_tension: 0.4,
        modality: Modality::Mutable,
        hash: String::new(),
    })
}

/// Shallow-merge `overrides` onto `base`, clamp, and rehash.
pub fn apply_overrides(base: &ControlSurfacePayload, overrides: &ControlOverrides) -> ControlSurfacePayload {
    let mut merged = base.clone();
    let set = |target: &mut f64, value: Option<f64>| {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            *target = v;
        }
    };
    set(&mut merged.arc_shape, overrides.arc_shape);
    set(&mut merged.density_level, overrides.density_level);
    set(&mut merged.tempo_norm, overrides.tempo_norm);
    set(&mut merged.step_bias, overrides.step_bias);
    set(&mut merged.syncopation_bias, overrides.syncopation_bias);
    set(&mut merged.motif_rate, overrides.motif_rate);
    set(&mut merged.aspect_tension, overrides.aspect_tension);
    if let Some(cap) = overrides.leap_cap.and_then(|v| round_to_u8(v, LEAP_CAP_MIN, LEAP_CAP_MAX)) {
        merged.leap_cap = cap;
    }
    if let Some(id) = overrides.rhythm_template_id.and_then(|v| round_to_u8(v, 0, RHYTHM_TEMPLATE_MAX)) {
        merged.rhythm_template_id = id;
    }
    if let Some(element) = overrides.element_dominance {
        merged.element_dominance = element;
    }
    if let Some(modality) = overrides.modality {
        merged.modality = modality;
    }
    rehash(clamp_payload(merged))
}

// ── Validation ──

/// Check one chart point. `fields` names latitude, longitude and datetime as
/// the client spelled them, for error details.
pub fn validate_point(params: Option<&SkyParams>, fields: [&str; 3]) -> Result<SkyPoint, Vec<FieldError>> {
    let [lat_field, lon_field, dt_field] = fields;
    let empty = SkyParams::default();
    let params = params.unwrap_or(&empty);
    let mut errors = Vec::new();

    match params.latitude {
        None => errors.push(FieldError::new(lat_field, "is required")),
        Some(lat) if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) => {
            errors.push(FieldError::new(lat_field, "must be between -90 and 90"))
        }
        Some(_) => {}
    }
    match params.longitude {
        None => errors.push(FieldError::new(lon_field, "is required")),
        Some(lon) if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) => {
            errors.push(FieldError::new(lon_field, "must be between -180 and 180"))
        }
        Some(_) => {}
    }
    match params.datetime.as_deref() {
        None | Some("") => errors.push(FieldError::new(dt_field, "is required")),
        Some(dt) if DateTime::parse_from_rfc3339(dt).is_err() => {
            errors.push(FieldError::new(dt_field, "must be an RFC 3339 timestamp"))
        }
        Some(_) => {}
    }

    match (params.latitude, params.longitude, &params.datetime) {
        (Some(latitude), Some(longitude), Some(datetime)) if errors.is_empty() => Ok(SkyPoint {
            latitude,
            longitude,
            datetime: datetime.clone(),
        }),
        _ => Err(errors),
    }
}

// ── Astro profile ──

/// Astro summary plus the element weights behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct AstroProfile {
    pub summary: AstroSummary,
    pub element_weights: ElementWeights,
}

impl AstroProfile {
    /// First seeded draw: location and time to astro profile.
    pub fn for_sky(point: &SkyPoint) -> Self {
        let mut rng = SeededRng::from_seed_str(&point.seed());
        let element_weights = ElementWeights {
            fire: 0.2 + rng.next_f64(),
            earth: 0.2 + rng.next_f64(),
            air: 0.2 + rng.next_f64(),
            water: 0.2 + rng.next_f64(),
        }
        .normalized();
        let aspect_tension = round3(rng.next_f64());
        let modality = *rng.pick(&Modality::ALL);
        AstroProfile {
            summary: AstroSummary {
                element_dominance: element_weights.dominant(),
                aspect_tension,
                modality,
            },
            element_weights,
        }
    }

    /// Profile implied by a payload that has no chart behind it.
    pub fn from_payload(payload: &ControlSurfacePayload) -> Self {
        AstroProfile {
            summary: AstroSummary {
                element_dominance: payload.element_dominance,
                aspect_tension: payload.aspect_tension,
                modality: payload.modality,
            },
            element_weights: ElementWeights::favoring(payload.element_dominance),
        }
    }

    /// Seed string for the second draw. Depends on the summary only.
    pub fn seed(&self) -> String {
        let s = &self.summary;
        format!(
            "{}|{:.3}|{}",
            s.element_dominance.as_str(),
            s.aspect_tension,
            s.modality.as_str()
        )
    }
}

// ── Sky ──

/// Second seeded draw: astro profile to controls.
pub fn sky_controls(profile: &AstroProfile) -> ControlSurfacePayload {
    let mut rng = SeededRng::from_seed_str(&derive_seed(&profile.seed(), "controls"));
    let summary = &profile.summary;
    let tension = summary.aspect_tension;
    let (tempo_bias, density_bias) = match summary.element_dominance {
        Element::Fire => (0.15, 0.1),
        Element::Earth => (-0.1, 0.0),
        Element::Air => (0.05, -0.05),
        Element::Water => (-0.05, 0.05),
    };

    let arc_shape = round3(0.35 + 0.5 * rng.next_f64());
    let density_level = round3(0.3 + 0.4 * rng.next_f64() + density_bias);
    let tempo_norm = round3(0.3 + 0.4 * rng.next_f64() + tempo_bias);
    let step_bias = round3(0.5 + 0.3 * rng.next_f64() - 0.1 * tension);
    let mut leap_cap = rng.range_u32(3, 6) as u8;
    if tension > 0.6 {
        leap_cap += 1;
    }
    let rhythm_template_id = rng.range_u32(0, RHYTHM_TEMPLATE_MAX as u32 + 1) as u8;
    let syncopation_bias = round3(0.1 + 0.3 * rng.next_f64() + 0.2 * tension);
    let motif_rate = round3(0.35 + 0.45 * rng.next_f64());

    rehash(clamp_payload(ControlSurfacePayload {
        arc_shape,
        density_level,
        tempo_norm,
        step_bias,
        leap_cap,
        rhythm_template_id,
        syncopation_bias,
        motif_rate,
        element_dominance: summary.element_dominance,
        aspect_tension: tension,
        modality: summary.modality,
        hash: String::new(),
    }))
}

/// Profile and payload for one chart point.
pub fn sky_payload(point: &SkyPoint) -> (AstroProfile, ControlSurfacePayload) {
    let profile = AstroProfile::for_sky(point);
    let payload = sky_controls(&profile);
    (profile, payload)
}

// ── Compatibility ──

/// Blend two payloads: numeric fields averaged, integers rounded, chart A's
/// element kept only above the score threshold, modality mutable.
pub fn blend_compatibility(
    a: &ControlSurfacePayload,
    b: &ControlSurfacePayload,
    score: f64,
) -> ControlSurfacePayload {
    let mean = |x: f64, y: f64| round6(0.5 * (x + y));
    let mean_u8 = |x: u8, y: u8| ((x as f64 + y as f64) / 2.0).round() as u8;
    let element_dominance = if score > COMPATIBILITY_ELEMENT_THRESHOLD {
        a.element_dominance
    } else {
        Element::Air
    };
    rehash(clamp_payload(ControlSurfacePayload {
        arc_shape: mean(a.arc_shape, b.arc_shape),
        density_level: mean(a.density_level, b.density_level),
        tempo_norm: mean(a.tempo_norm, b.tempo_norm),
        step_bias: mean(a.step_bias, b.step_bias),
        leap_cap: mean_u8(a.leap_cap, b.leap_cap),
        rhythm_template_id: mean_u8(a.rhythm_template_id, b.rhythm_template_id),
        syncopation_bias: mean(a.syncopation_bias, b.syncopation_bias),
        motif_rate: mean(a.motif_rate, b.motif_rate),
        element_dominance,
        aspect_tension: mean(a.aspect_tension, b.aspect_tension),
        modality: Modality::Mutable,
        hash: String::new(),
    }))
}

/// Match-cache key: order-independent in the two charts.
pub fn match_key(hash_a: &str, hash_b: &str, score: f64) -> String {
    let (first, second) = if hash_a <= hash_b { (hash_a, hash_b) } else { (hash_b, hash_a) };
    format!("match:{first}|{second}|{score:.6}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nyc() -> SkyPoint {
        SkyPoint {
            latitude: 40.7128,
            longitude: -74.006,
            datetime: "2025-01-01T12:00:00Z".into(),
        }
    }

    fn in_domain(p: &ControlSurfacePayload) -> bool {
        let unit = |x: f64| (0.0..=1.0).contains(&x);
        unit(p.arc_shape)
            && unit(p.density_level)
            && unit(p.tempo_norm)
            && unit(p.step_bias)
            && unit(p.syncopation_bias)
            && unit(p.motif_rate)
            && unit(p.aspect_tension)
            && (1..=6).contains(&p.leap_cap)
            && p.rhythm_template_id <= 7
    }

    #[test]
    fn sandbox_default_values() {
        let p = sandbox_default();
        assert_eq!(p.rhythm_template_id, 3);
        assert_eq!(p.leap_cap, 5);
        assert_eq!(p.element_dominance, Element::Air);
        assert_eq!(p.hash.len(), 16);
        assert!(hash_is_current(&p));
    }

    #[test]
    fn hash_changes_with_every_field() {
        let base = sandbox_default();
        let mut variants = Vec::new();
        let mut v = base.clone();
        v.arc_shape = 0.61;
        variants.push(v);
        let mut v = base.clone();
        v.leap_cap = 4;
        variants.push(v);
        let mut v = base.clone();
        v.rhythm_template_id = 2;
        variants.push(v);
        let mut v = base.clone();
        v.element_dominance = Element::Fire;
        variants.push(v);
        let mut v = base.clone();
        v.modality = Modality::Fixed;
        variants.push(v);
        let mut v = base.clone();
        v.motif_rate = 0.51;
        variants.push(v);
        for variant in variants {
            assert_ne!(compute_hash(&variant), base.hash);
        }
        assert_eq!(compute_hash(&base), base.hash);
    }

    #[test]
    fn hash_ignores_stale_hash_field() {
        let base = sandbox_default();
        let mut stale = base.clone();
        stale.hash = "stale".into();
        assert_eq!(compute_hash(&stale), base.hash);
        assert!(!hash_is_current(&stale));
    }

    #[test]
    fn sub_micro_change_alters_hash() {
        let base = sandbox_default();
        let nudged = apply_overrides(
            &base,
            &ControlOverrides {
                step_bias: Some(0.6 + 1e-7),
                ..Default::default()
            },
        );
        assert_ne!(nudged.step_bias, base.step_bias);
        assert_ne!(nudged.hash, base.hash);
        assert!(hash_is_current(&nudged));

        let mut tiny = base.clone();
        tiny.aspect_tension += 1e-12;
        assert_ne!(compute_hash(&tiny), base.hash);
    }

    #[test]
    fn overrides_merge_clamp_and_rehash() {
        let overrides = ControlOverrides {
            step_bias: Some(1.7),
            leap_cap: Some(2.6),
            rhythm_template_id: Some(12.0),
            element_dominance: Some(Element::Water),
            ..Default::default()
        };
        let merged = apply_overrides(&sandbox_default(), &overrides);
        assert_eq!(merged.step_bias, 1.0);
        assert_eq!(merged.leap_cap, 3);
        assert_eq!(merged.rhythm_template_id, 7);
        assert_eq!(merged.element_dominance, Element::Water);
        assert_eq!(merged.arc_shape, 0.6);
        assert!(hash_is_current(&merged));
        assert_ne!(merged.hash, sandbox_default().hash);
    }

    #[test]
    fn empty_overrides_keep_default_hash() {
        let merged = apply_overrides(&sandbox_default(), &ControlOverrides::default());
        assert_eq!(merged, sandbox_default());
    }

    #[test]
    fn sky_is_deterministic_and_in_domain() {
        let (profile_a, a) = sky_payload(&nyc());
        let (profile_b, b) = sky_payload(&nyc());
        assert_eq!(profile_a, profile_b);
        assert_eq!(a, b);
        assert!(in_domain(&a));
        assert!(hash_is_current(&a));
        assert_eq!(a.element_dominance, profile_a.element_weights.dominant());
    }

    #[test]
    fn sky_changes_with_location() {
        let mut other = nyc();
        other.latitude = 40.7129;
        assert_ne!(sky_payload(&nyc()).1.hash, sky_payload(&other).1.hash);
    }

    #[test]
    fn sky_controls_depend_only_on_summary() {
        let profile = AstroProfile::for_sky(&nyc());
        let mut reweighted = profile.clone();
        reweighted.element_weights = ElementWeights::uniform();
        assert_eq!(sky_controls(&profile), sky_controls(&reweighted));
    }

    #[test]
    fn validation_reports_each_field() {
        let params = SkyParams {
            latitude: Some(91.0),
            longitude: None,
            datetime: Some("yesterday".into()),
        };
        let errors = validate_point(Some(&params), ["lat", "lon", "dt"]).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["lat", "lon", "dt"]);
        assert_eq!(validate_point(None, ["a", "b", "c"]).unwrap_err().len(), 3);
        let ok = SkyParams::new(40.7128, -74.006, "2025-01-01T12:00:00Z");
        assert_eq!(validate_point(Some(&ok), ["a", "b", "c"]).unwrap(), nyc());
    }

    #[test]
    fn compatibility_blend_rules() {
        let a = sandbox_default();
        let mut b = apply_overrides(
            &a,
            &ControlOverrides {
                leap_cap: Some(2.0),
                rhythm_template_id: Some(6.0),
                arc_shape: Some(0.2),
                element_dominance: Some(Element::Fire),
                modality: Some(Modality::Cardinal),
                ..Default::default()
            },
        );
        b = rehash(b);
        let high = blend_compatibility(&b, &a, 0.8);
        assert_eq!(high.element_dominance, Element::Fire);
        assert_eq!(high.modality, Modality::Mutable);
        assert_eq!(high.leap_cap, 4);
        assert_eq!(high.rhythm_template_id, 5);
        assert!((high.arc_shape - 0.4).abs() < 1e-9);
        assert!(hash_is_current(&high));
        let low = blend_compatibility(&b, &a, 0.7);
        assert_eq!(low.element_dominance, Element::Air);
    }

    #[test]
    fn match_key_is_order_independent() {
        assert_eq!(match_key("b", "a", 0.5), match_key("a", "b", 0.5));
        assert_ne!(match_key("a", "b", 0.5), match_key("a", "b", 0.6));
    }
}

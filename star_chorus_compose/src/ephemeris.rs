// Ephemeris snapshots and the provider seam.
//
// Real planetary positions come from an external ephemeris service. The
// pipeline only sees `EphemerisSnapshot` values through the
// `EphemerisProvider` trait. `MockEphemeris` stands in for the service: it
// places the Sun from the day of the year and draws every other body from a
// generator keyed by the sky point, then derives house cusps, aspects, moon
// phase and element weights from those positions the way a real snapshot
// would carry them.

use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};
use star_chorus_prng::{SeededRng, derive_seed};
use star_chorus_protocol::Element;

/// Canonical planet order used by the feature encoder.
pub const PLANETS: [&str; 10] = [
    "Sun", "Moon", "Mercury", "Venus", "Mars", "Jupiter", "Saturn", "Uranus", "Neptune", "Pluto",
];

/// A validated chart location and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// RFC 3339, as supplied by the client.
    pub datetime: String,
}

impl SkyPoint {
    /// Seed string for everything derived from this point.
    pub fn seed(&self) -> String {
        format!("{}|{}|{}", self.latitude, self.longitude, self.datetime)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanetPosition {
    pub name: String,
    /// Ecliptic longitude in degrees.
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Degrees per day; negative when retrograde.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectType {
    Conjunction,
    Sextile,
    Square,
    Trine,
    Opposition,
}

impl AspectType {
    pub const ALL: [AspectType; 5] = [
        AspectType::Conjunction,
        AspectType::Sextile,
        AspectType::Square,
        AspectType::Trine,
        AspectType::Opposition,
    ];

    pub fn angle(self) -> f64 {
        match self {
            AspectType::Conjunction => 0.0,
            AspectType::Sextile => 60.0,
            AspectType::Square => 90.0,
            AspectType::Trine => 120.0,
            AspectType::Opposition => 180.0,
        }
    }

    /// Maximum orb in degrees.
    pub fn max_orb(self) -> f64 {
        match self {
            AspectType::Sextile => 6.0,
            _ => 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aspect {
    pub body_a: String,
    pub body_b: String,
    pub aspect_type: AspectType,
    pub orb_degrees: f64,
}

/// Relative element emphasis; sums to roughly 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementWeights {
    pub fire: f64,
    pub earth: f64,
    pub air: f64,
    pub water: f64,
}

impl ElementWeights {
    pub fn get(&self, element: Element) -> f64 {
        match element {
            Element::Fire => self.fire,
            Element::Earth => self.earth,
            Element::Air => self.air,
            Element::Water => self.water,
        }
    }

    /// Heaviest element; ties go to the earlier element in fire, earth, air,
    /// water order.
    pub fn dominant(&self) -> Element {
        Element::ALL
            .into_iter()
            .fold(Element::Fire, |best, e| if self.get(e) > self.get(best) { e } else { best })
    }

    /// Scale so the weights sum to 1. All-zero input becomes uniform.
    pub fn normalized(&self) -> Self {
        let total = self.fire + self.earth + self.air + self.water;
        if !total.is_finite() || total <= 0.0 {
            return ElementWeights::uniform();
        }
        ElementWeights {
            fire: self.fire / total,
            earth: self.earth / total,
            air: self.air / total,
            water: self.water / total,
        }
    }

    pub fn uniform() -> Self {
        ElementWeights {
            fire: 0.25,
            earth: 0.25,
            air: 0.25,
            water: 0.25,
        }
    }

    /// Weights concentrated on one element (0.5, the rest shared equally).
    pub fn favoring(element: Element) -> Self {
        let rest = 0.5 / 3.0;
        let w = |e: Element| if e == element { 0.5 } else { rest };
        ElementWeights {
            fire: w(Element::Fire),
            earth: w(Element::Earth),
            air: w(Element::Air),
            water: w(Element::Water),
        }
    }

    pub fn average(a: &Self, b: &Self) -> Self {
        ElementWeights {
            fire: 0.5 * (a.fire + b.fire),
            earth: 0.5 * (a.earth + b.earth),
            air: 0.5 * (a.air + b.air),
            water: 0.5 * (a.water + b.water),
        }
    }
}

/// One chart's astronomical data. Read-only once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemerisSnapshot {
    pub timestamp: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub house_system: String,
    pub planets: Vec<PlanetPosition>,
    pub house_cusps: Vec<f64>,
    pub aspects: Vec<Aspect>,
    /// 0 = new, 0.5 = full.
    pub moon_phase: f64,
    pub element_weights: ElementWeights,
}

/// Source of ephemeris snapshots.
pub trait EphemerisProvider: Send + Sync {
    fn snapshot(&self, point: &SkyPoint) -> EphemerisSnapshot;
}

/// Deterministic stand-in for the ephemeris service.
#[derive(Debug, Clone, Default)]
pub struct MockEphemeris;

impl EphemerisProvider for MockEphemeris {
    fn snapshot(&self, point: &SkyPoint) -> EphemerisSnapshot {
        let mut rng = SeededRng::from_seed_str(&derive_seed(&point.seed(), "ephemeris"));
        let parsed = DateTime::parse_from_rfc3339(&point.datetime).ok();
        let day_of_year = parsed.map_or(80.0, |dt| dt.ordinal() as f64);
        let hour = parsed.map_or(12.0, |dt| dt.hour() as f64 + dt.minute() as f64 / 60.0);

        // Sun at 0 Aries around the March equinox.
        let sun = ((day_of_year - 80.0) * 360.0 / 365.25).rem_euclid(360.0);
        let planets: Vec<PlanetPosition> = PLANETS
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let longitude = if i == 0 {
                    sun
                } else if i == 2 || i == 3 {
                    // Mercury and Venus stay near the Sun.
                    (sun + rng.range_f64(-45.0, 45.0)).rem_euclid(360.0)
                } else {
                    rng.range_f64(0.0, 360.0)
                };
                PlanetPosition {
                    name: (*name).to_string(),
                    longitude,
                    latitude: Some(rng.range_f64(-5.0, 5.0)),
                    speed: Some(rng.range_f64(-0.5, 1.5)),
                }
            })
            .collect();

        let ascendant = (point.longitude + hour * 15.0 + sun).rem_euclid(360.0);
        let house_cusps = (0..12).map(|h| (ascendant + 30.0 * h as f64).rem_euclid(360.0)).collect();
        let moon_phase = (planets[1].longitude - sun).rem_euclid(360.0) / 360.0;

        let mut counts = [0.0f64; 4];
        for planet in &planets {
            let sign = (planet.longitude / 30.0).floor() as usize % 12;
            counts[sign % 4] += 1.0;
        }
        let element_weights = ElementWeights {
            fire: counts[0],
            earth: counts[1],
            air: counts[2],
            water: counts[3],
        }
        .normalized();

        EphemerisSnapshot {
            timestamp: point.datetime.clone(),
            timezone: "UTC".into(),
            latitude: point.latitude,
            longitude: point.longitude,
            house_system: "equal".into(),
            aspects: find_aspects(&planets),
            planets,
            house_cusps,
            moon_phase,
            element_weights,
        }
    }
}

/// Angular separation in [0, 180].
pub fn separation(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 { 360.0 - d } else { d }
}

/// All major aspects between pairs of planets, tightest match per pair.
pub fn find_aspects(planets: &[PlanetPosition]) -> Vec<Aspect> {
    let mut aspects = Vec::new();
    for (i, a) in planets.iter().enumerate() {
        for b in &planets[i + 1..] {
            let sep = separation(a.longitude, b.longitude);
            let found = AspectType::ALL
                .into_iter()
                .map(|t| (t, (sep - t.angle()).abs()))
                .filter(|(t, orb)| *orb <= t.max_orb())
                .min_by(|x, y| x.1.total_cmp(&y.1));
            if let Some((aspect_type, orb)) = found {
                aspects.push(Aspect {
                    body_a: a.name.clone(),
                    body_b: b.name.clone(),
                    aspect_type,
                    orb_degrees: orb,
                });
            }
        }
    }
    aspects
}

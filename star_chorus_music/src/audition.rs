// The Audition Gate: structural validation with auto-repair, followed by
// rule-quality critics checked against calibrated and strict threshold sets.
//
// Phase A (structural) runs on the plan in place:
// 1. Every event's t0/t1/pitch/velocity must be finite. A non-finite plan is
//    recorded as an issue and left untouched (no repair is attempted).
// 2. Timewarp: if the span (latest t1) differs from `duration_sec` by more
//    than the tolerance, every t0/t1 is multiplied by `duration_sec / span`.
//    One global factor, never per-event drift correction.
// 3. Overlap trim: all non-harmony events are scanned in onset order across
//    channels. An event starting before its predecessor ends is pushed to
//    that end unless the two share a group. An event left with no duration
//    is dropped and the scan continues from the survivor.
// 4. Event count and required channels are checked after repair.
//
// Phase B (rule quality) runs the critics in critics.rs and maps four of
// their metrics onto the externally reported sub-gates. `overall` in each
// flag set is always the conjunction of the four sub-gates; the only other
// way to clear it is the explicit `force_fail` override.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use star_chorus_prng::{SeededRng, derive_seed};

use crate::critics::{RuleQuality, RuleThresholds, evaluate};
use crate::plan::{Channel, Plan};

/// Structural contract a plan must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralConfig {
    pub min_events: usize,
    /// Allowed |span - duration_sec| in seconds before a timewarp.
    pub tolerance_sec: f64,
    pub required_channels: Vec<Channel>,
}

impl Default for StructuralConfig {
    fn default() -> Self {
        StructuralConfig {
            min_events: 8,
            tolerance_sec: 1.0,
            required_channels: vec![Channel::Melody, Channel::Harmony],
        }
    }
}

/// A problem the gate could not repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralIssue {
    TooFewEvents { found: usize, required: usize },
    MissingChannel { channel: Channel },
    NonFinite { index: usize },
}

/// A repair applied to the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Repair {
    Timewarp { factor: f64 },
    OverlapTrim { trimmed: usize, dropped: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralReport {
    pub passed: bool,
    pub issues: Vec<StructuralIssue>,
    pub repairs: Vec<Repair>,
}

/// Validate and repair a plan in place.
pub fn check_structure(plan: &mut Plan, config: &StructuralConfig) -> StructuralReport {
    let mut report = StructuralReport::default();

    let non_finite: Vec<usize> = plan
        .events
        .iter()
        .enumerate()
        .filter(|(_, e)| !e.is_finite())
        .map(|(i, _)| i)
        .collect();

    if non_finite.is_empty() && plan.duration_sec.is_finite() && plan.duration_sec > 0.0 {
        if let Some(factor) = timewarp(plan, config.tolerance_sec) {
            report.repairs.push(Repair::Timewarp { factor });
        }
        let (trimmed, dropped) = trim_overlaps(plan);
        if trimmed + dropped > 0 {
            report.repairs.push(Repair::OverlapTrim { trimmed, dropped });
        }
    } else {
        report
            .issues
            .extend(non_finite.into_iter().map(|index| StructuralIssue::NonFinite { index }));
    }

    if plan.events.len() < config.min_events {
        report.issues.push(StructuralIssue::TooFewEvents {
            found: plan.events.len(),
            required: config.min_events,
        });
    }
    for &channel in &config.required_channels {
        if !plan.has_channel(channel) {
            report.issues.push(StructuralIssue::MissingChannel { channel });
        }
    }

    report.passed = report.issues.is_empty();
    report
}

/// Rescale all event times so the span matches `duration_sec`. Returns the
/// factor applied, if any.
fn timewarp(plan: &mut Plan, tolerance: f64) -> Option<f64> {
    let span = plan.span();
    if span <= 0.0 || (span - plan.duration_sec).abs() <= tolerance {
        return None;
    }
    let factor = plan.duration_sec / span;
    for event in &mut plan.events {
        event.t0 *= factor;
        event.t1 *= factor;
    }
    Some(factor)
}

/// Returns `(trimmed, dropped)` counts.
fn trim_overlaps(plan: &mut Plan) -> (usize, usize) {
    let mut order: Vec<usize> = (0..plan.events.len())
        .filter(|&i| plan.events[i].channel != Channel::Harmony)
        .collect();
    order.sort_by(|&a, &b| plan.events[a].t0.total_cmp(&plan.events[b].t0));

    let mut trimmed = 0;
    let mut drop = vec![false; plan.events.len()];
    let mut previous: Option<usize> = None;
    for idx in order {
        if let Some(prev) = previous {
            let (prev_event, event) = (&plan.events[prev], &plan.events[idx]);
            if event.t0 < prev_event.t1 && !prev_event.grouped_with(event) {
                let end = prev_event.t1;
                plan.events[idx].t0 = end;
                trimmed += 1;
                if plan.events[idx].t1 <= plan.events[idx].t0 {
                    drop[idx] = true;
                    continue;
                }
            }
        }
        previous = Some(idx);
    }

    let dropped = drop.iter().filter(|&&d| d).count();
    if dropped > 0 {
        let mut flags = drop.into_iter();
        plan.events.retain(|_| !flags.next().unwrap_or(false));
    }
    (trimmed - dropped, dropped)
}

// ── Gates ──

/// Thresholds for the four reported sub-gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    pub melody_arc: f64,
    pub melody_step_leap: f64,
    pub melody_narrative: f64,
    pub rhythm_diversity: f64,
}

impl GateThresholds {
    /// Looser set deciding whether descriptive text is shown at all.
    pub fn calibrated() -> Self {
        GateThresholds {
            melody_arc: 0.35,
            melody_step_leap: 0.40,
            melody_narrative: 0.30,
            rhythm_diversity: 0.30,
        }
    }

    /// Tighter set deciding whether sandbox hints are offered.
    pub fn strict() -> Self {
        GateThresholds {
            melody_arc: 0.60,
            melody_step_leap: 0.70,
            melody_narrative: 0.55,
            rhythm_diversity: 0.50,
        }
    }
}

/// The four gate metrics of one plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateScores {
    pub melody_arc: f64,
    pub melody_step_leap: f64,
    pub melody_narrative: f64,
    pub rhythm_diversity: f64,
}

impl GateScores {
    pub fn from_quality(quality: &RuleQuality) -> Self {
        GateScores {
            melody_arc: quality.melody.arc,
            melody_step_leap: quality.melody.step_leap,
            melody_narrative: quality.melody.narrative(),
            rhythm_diversity: quality.rhythm.diversity,
        }
    }
}

/// Pass/fail flags for one threshold set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateFlags {
    pub melody_arc: bool,
    pub melody_step_leap: bool,
    pub melody_narrative: bool,
    pub rhythm_diversity: bool,
    pub overall: bool,
}

impl GateFlags {
    pub fn evaluate(scores: &GateScores, thresholds: &GateThresholds) -> Self {
        let mut flags = GateFlags {
            melody_arc: scores.melody_arc >= thresholds.melody_arc,
            melody_step_leap: scores.melody_step_leap >= thresholds.melody_step_leap,
            melody_narrative: scores.melody_narrative >= thresholds.melody_narrative,
            rhythm_diversity: scores.rhythm_diversity >= thresholds.rhythm_diversity,
            overall: false,
        };
        flags.recompute();
        flags
    }

    /// Every sub-gate failed (used when the structure is broken).
    pub fn all_failed() -> Self {
        GateFlags {
            melody_arc: false,
            melody_step_leap: false,
            melody_narrative: false,
            rhythm_diversity: false,
            overall: false,
        }
    }

    pub fn recompute(&mut self) {
        self.overall = self.melody_arc && self.melody_step_leap && self.melody_narrative && self.rhythm_diversity;
    }

    /// Test-only override: clear `overall` regardless of the sub-gates.
    pub fn force_fail(&mut self) {
        self.overall = false;
    }

    /// Names of failing sub-gates, in report order.
    pub fn failing(&self) -> Vec<&'static str> {
        [
            ("melody_arc", self.melody_arc),
            ("melody_step_leap", self.melody_step_leap),
            ("melody_narrative", self.melody_narrative),
            ("rhythm_diversity", self.rhythm_diversity),
        ]
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub calibrated: GateFlags,
    pub strict: GateFlags,
    /// Every critic metric cleared its own rule threshold.
    pub rule_quality_passed: bool,
    /// Critic metrics below their rule threshold.
    pub rule_quality_failing: Vec<String>,
    pub scores: BTreeMap<String, f64>,
    pub latency_ms: BTreeMap<String, f64>,
}

impl GateReport {
    /// Apply the fail-closed override to the calibrated set.
    pub fn force_fail(&mut self) {
        self.calibrated.force_fail();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditionConfig {
    pub structural: StructuralConfig,
    pub calibrated: GateThresholds,
    pub strict: GateThresholds,
    pub rules: RuleThresholds,
}

impl Default for AuditionConfig {
    fn default() -> Self {
        AuditionConfig {
            structural: StructuralConfig::default(),
            calibrated: GateThresholds::calibrated(),
            strict: GateThresholds::strict(),
            rules: RuleThresholds::default(),
        }
    }
}

/// Full gate output.
#[derive(Debug, Clone, PartialEq)]
pub struct Audition {
    pub report: GateReport,
    pub structural: StructuralReport,
    pub quality: RuleQuality,
}

/// Run both phases. `seed` (the control-surface hash) keys the simulated
/// stage latencies so the report is reproducible.
pub fn audition(plan: &mut Plan, seed: &str, config: &AuditionConfig) -> Audition {
    let structural = check_structure(plan, &config.structural);
    let quality = evaluate(plan, &config.rules);
    let gate_scores = GateScores::from_quality(&quality);

    let (calibrated, strict) = if structural.passed {
        (
            GateFlags::evaluate(&gate_scores, &config.calibrated),
            GateFlags::evaluate(&gate_scores, &config.strict),
        )
    } else {
        (GateFlags::all_failed(), GateFlags::all_failed())
    };

    let mut scores: BTreeMap<String, f64> = quality
        .metrics()
        .iter()
        .map(|(name, value)| (name.to_string(), round4(*value)))
        .collect();
    scores.insert("melody_narrative".into(), round4(gate_scores.melody_narrative));
    scores.insert("melody_gaming_penalty".into(), round4(quality.melody.gaming_penalty));
    scores.insert("aggregate".into(), round4(quality.aggregate));

    Audition {
        report: GateReport {
            calibrated,
            strict,
            rule_quality_passed: quality.passed,
            rule_quality_failing: quality.failing.clone(),
            scores,
            latency_ms: simulated_latency(seed),
        },
        structural,
        quality,
    }
}

fn round4(x: f64) -> f64 {
    if x.is_finite() { (x * 10_000.0).round() / 10_000.0 } else { 0.0 }
}

fn simulated_latency(seed: &str) -> BTreeMap<String, f64> {
    let mut rng = SeededRng::from_seed_str(&derive_seed(seed, "audition"));
    let structural = (rng.range_f64(0.5, 3.0) * 10.0).round() / 10.0;
    let critics = (rng.range_f64(4.0, 20.0) * 10.0).round() / 10.0;
    BTreeMap::from([
        ("structural".to_string(), structural),
        ("critics".to_string(), critics),
        ("total".to_string(), ((structural + critics) * 10.0).round() / 10.0),
    ])
}

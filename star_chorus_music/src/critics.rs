// Rule-quality critics: multi-layer evaluation of a plan.
//
// Three critics each return named sub-scores in [0, 1]:
//
// Melody (melody channel, onset order): arc shape, motif recurrence, contour
//   entropy, step/leap balance, range adequacy, plus a "gaming penalty" that
//   discounts degenerate-but-valid lines (>85% steps, <8 semitone range,
//   monotonic runs longer than 6 moves).
// Harmony (harmony channel grouped into chords, roots from the bass when one
//   sounds at the chord onset): progression legality, voice leading, tension,
//   complexity, resolution to the tonic.
// Rhythm (percussion onsets on an eighth-note grid, plus melody onsets for
//   inter-onset variety): syncopation, groove consistency, tempo fit,
//   diversity, downbeat accent.
//
// The aggregate is the mean of the penalised melodic average, the harmonic
// average and the rhythmic average. A plan passes rule quality only if every
// one of the fifteen named sub-metrics clears its own threshold in
// `RuleThresholds`.
//
// Consumed by cascade.rs (candidate reranking) and audition.rs (gate scores).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::mode::Key;
use crate::plan::{Channel, Plan, interval};

/// Melody sub-scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MelodyScores {
    pub arc: f64,
    pub motif: f64,
    pub contour_entropy: f64,
    pub step_leap: f64,
    pub range: f64,
    /// Multiplicative discount in [0, 0.75].
    pub gaming_penalty: f64,
}

impl MelodyScores {
    pub fn average(&self) -> f64 {
        (self.arc + self.motif + self.contour_entropy + self.step_leap + self.range) / 5.0
    }

    pub fn penalised(&self) -> f64 {
        self.average() * (1.0 - self.gaming_penalty)
    }

    /// Story-telling quality: motif recurrence balanced against contour
    /// variety.
    pub fn narrative(&self) -> f64 {
        0.5 * (self.motif + self.contour_entropy)
    }
}

/// Harmony sub-scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarmonyScores {
    pub progression: f64,
    pub voice_leading: f64,
    pub tension: f64,
    pub complexity: f64,
    pub resolution: f64,
}

impl HarmonyScores {
    pub fn average(&self) -> f64 {
        (self.progression + self.voice_leading + self.tension + self.complexity + self.resolution) / 5.0
    }
}

/// Rhythm sub-scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RhythmScores {
    pub syncopation: f64,
    pub groove: f64,
    pub tempo_fit: f64,
    pub diversity: f64,
    pub accent: f64,
}

impl RhythmScores {
    pub fn average(&self) -> f64 {
        (self.syncopation + self.groove + self.tempo_fit + self.diversity + self.accent) / 5.0
    }
}

/// Per-metric pass thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    pub melody_arc: f64,
    pub melody_motif: f64,
    pub melody_contour_entropy: f64,
    pub melody_step_leap: f64,
    pub melody_range: f64,
    pub harmony_progression: f64,
    pub harmony_voice_leading: f64,
    pub harmony_tension: f64,
    pub harmony_complexity: f64,
    pub harmony_resolution: f64,
    pub rhythm_syncopation: f64,
    pub rhythm_groove: f64,
    pub rhythm_tempo_fit: f64,
    pub rhythm_diversity: f64,
    pub rhythm_accent: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        RuleThresholds {
            melody_arc: 0.3,
            melody_motif: 0.2,
            melody_contour_entropy: 0.3,
            melody_step_leap: 0.3,
            melody_range: 0.4,
            harmony_progression: 0.5,
            harmony_voice_leading: 0.3,
            harmony_tension: 0.3,
            harmony_complexity: 0.25,
            harmony_resolution: 0.2,
            rhythm_syncopation: 0.2,
            rhythm_groove: 0.3,
            rhythm_tempo_fit: 0.5,
            rhythm_diversity: 0.25,
            rhythm_accent: 0.3,
        }
    }
}

impl RuleThresholds {
    /// Thresholds in the same order as `RuleQuality::metrics`.
    pub fn named(&self) -> [(&'static str, f64); 15] {
        [
            ("melody_arc", self.melody_arc),
            ("melody_motif", self.melody_motif),
            ("melody_contour_entropy", self.melody_contour_entropy),
            ("melody_step_leap", self.melody_step_leap),
            ("melody_range", self.melody_range),
            ("harmony_progression", self.harmony_progression),
            ("harmony_voice_leading", self.harmony_voice_leading),
            ("harmony_tension", self.harmony_tension),
            ("harmony_complexity", self.harmony_complexity),
            ("harmony_resolution", self.harmony_resolution),
            ("rhythm_syncopation", self.rhythm_syncopation),
            ("rhythm_groove", self.rhythm_groove),
            ("rhythm_tempo_fit", self.rhythm_tempo_fit),
            ("rhythm_diversity", self.rhythm_diversity),
            ("rhythm_accent", self.rhythm_accent),
        ]
    }
}

/// Full critic output for one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleQuality {
    pub melody: MelodyScores,
    pub harmony: HarmonyScores,
    pub rhythm: RhythmScores,
    pub aggregate: f64,
    /// True only if every named metric clears its threshold.
    pub passed: bool,
    /// Names of metrics below threshold, in `metrics()` order.
    pub failing: Vec<String>,
}

impl RuleQuality {
    pub fn metrics(&self) -> [(&'static str, f64); 15] {
        let (m, h, r) = (&self.melody, &self.harmony, &self.rhythm);
        [
            ("melody_arc", m.arc),
            ("melody_motif", m.motif),
            ("melody_contour_entropy", m.contour_entropy),
            ("melody_step_leap", m.step_leap),
            ("melody_range", m.range),
            ("harmony_progression", h.progression),
            ("harmony_voice_leading", h.voice_leading),
            ("harmony_tension", h.tension),
            ("harmony_complexity", h.complexity),
            ("harmony_resolution", h.resolution),
            ("rhythm_syncopation", r.syncopation),
            ("rhythm_groove", r.groove),
            ("rhythm_tempo_fit", r.tempo_fit),
            ("rhythm_diversity", r.diversity),
            ("rhythm_accent", r.accent),
        ]
    }
}

/// Run all three critics and check every metric against `thresholds`.
pub fn evaluate(plan: &Plan, thresholds: &RuleThresholds) -> RuleQuality {
    let melody = score_melody(plan);
    let harmony = score_harmony(plan);
    let rhythm = score_rhythm(plan);
    let aggregate = (melody.penalised() + harmony.average() + rhythm.average()) / 3.0;

    let mut quality = RuleQuality {
        melody,
        harmony,
        rhythm,
        aggregate,
        passed: false,
        failing: Vec::new(),
    };
    quality.failing = quality
        .metrics()
        .iter()
        .zip(thresholds.named().iter())
        .filter(|((_, score), (_, floor))| score < floor)
        .map(|((name, _), _)| name.to_string())
        .collect();
    quality.passed = quality.failing.is_empty();
    quality
}

/// Scalar rule-quality score used for reranking.
pub fn score_plan(plan: &Plan) -> f64 {
    let melody = score_melody(plan);
    (melody.penalised() + score_harmony(plan).average() + score_rhythm(plan).average()) / 3.0
}

/// Score 1.0 inside `[low, high]`, decaying linearly to 0 over `falloff`
/// outside it.
fn band(value: f64, low: f64, high: f64, falloff: f64) -> f64 {
    let distance = if value < low {
        low - value
    } else if value > high {
        value - high
    } else {
        0.0
    };
    (1.0 - distance / falloff).clamp(0.0, 1.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// ── Melody ──

pub fn score_melody(plan: &Plan) -> MelodyScores {
    let pitches: Vec<i32> = plan
        .channel_events(Channel::Melody)
        .iter()
        .map(|e| e.pitch.round() as i32)
        .collect();
    if pitches.len() < 2 {
        return MelodyScores::default();
    }
    let intervals: Vec<i32> = pitches.windows(2).map(|w| w[1] - w[0]).collect();
    let low = pitches.iter().copied().min().unwrap_or(0);
    let high = pitches.iter().copied().max().unwrap_or(0);
    let span = high - low;

    let moves: Vec<i32> = intervals.iter().copied().filter(|&iv| iv != 0).collect();
    let step_ratio = if moves.is_empty() {
        0.0
    } else {
        moves.iter().filter(|iv| iv.abs() <= 2).count() as f64 / moves.len() as f64
    };

    let mut gaming_penalty = 0.0;
    if step_ratio > 0.85 {
        gaming_penalty += 0.25;
    }
    if span < 8 {
        gaming_penalty += 0.25;
    }
    if longest_monotonic_run(&intervals) > 6 {
        gaming_penalty += 0.25;
    }

    MelodyScores {
        arc: arc_score(&pitches),
        motif: motif_score(&intervals),
        contour_entropy: contour_entropy(&intervals),
        step_leap: if moves.is_empty() { 0.0 } else { band(step_ratio, 0.5, 0.85, 0.4) },
        range: (span as f64 / 12.0).min(1.0),
        gaming_penalty,
    }
}

/// Reward a single climax in the middle of the line, rising from the opening
/// and falling toward the close. Repeated climax notes beyond three are
/// penalised.
fn arc_score(pitches: &[i32]) -> f64 {
    let n = pitches.len();
    let climax = pitches.iter().copied().max().unwrap_or(0);
    let climax_idx = pitches.iter().position(|&p| p == climax).unwrap_or(0);
    let position = climax_idx as f64 / (n - 1) as f64;
    let position_score = band(position, 0.3, 0.75, 0.3);

    let quarter = (n / 4).max(1);
    let shape_score = if n >= 4 && n > 2 * quarter {
        let avg = |s: &[i32]| s.iter().sum::<i32>() as f64 / s.len() as f64;
        let first = avg(&pitches[..quarter]);
        let middle = avg(&pitches[quarter..n - quarter]);
        let last = avg(&pitches[n - quarter..]);
        (if middle > first { 0.5 } else { 0.0 }) + (if middle > last { 0.5 } else { 0.0 })
    } else {
        0.0
    };

    let climax_count = pitches.iter().filter(|&&p| p == climax).count();
    let repeat_penalty = (climax_count.saturating_sub(3) as f64 * 0.1).min(0.3);

    (0.5 * position_score + 0.5 * shape_score - repeat_penalty).clamp(0.0, 1.0)
}

/// Fraction of three-interval windows whose pattern occurs more than once,
/// scaled so that 30% recurrence already counts as full marks.
fn motif_score(intervals: &[i32]) -> f64 {
    if intervals.len() < 3 {
        return 0.0;
    }
    let mut counts: BTreeMap<&[i32], usize> = BTreeMap::new();
    for window in intervals.windows(3) {
        *counts.entry(window).or_insert(0) += 1;
    }
    let windows = intervals.len() - 2;
    let recurring: usize = counts.values().filter(|&&c| c > 1).sum();
    (recurring as f64 / windows as f64 / 0.3).min(1.0)
}

/// Normalised Shannon entropy of interval classes (big down, step down,
/// repeat, step up, big up).
fn contour_entropy(intervals: &[i32]) -> f64 {
    if intervals.is_empty() {
        return 0.0;
    }
    let mut bins = [0usize; 5];
    for &iv in intervals {
        let bin = match iv {
            i32::MIN..=-3 => 0,
            -2..=-1 => 1,
            0 => 2,
            1..=2 => 3,
            _ => 4,
        };
        bins[bin] += 1;
    }
    let total = intervals.len() as f64;
    let entropy: f64 = bins
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.ln()
        })
        .sum();
    entropy / 5f64.ln()
}

/// Longest run of consecutive moves in the same direction. Repeats break
/// a run.
fn longest_monotonic_run(intervals: &[i32]) -> usize {
    let mut best = 0;
    let mut run = 0;
    let mut direction = 0;
    for &iv in intervals {
        let sign = iv.signum();
        if sign != 0 && sign == direction {
            run += 1;
        } else if sign != 0 {
            run = 1;
            direction = sign;
        } else {
            run = 0;
            direction = 0;
        }
        best = best.max(run);
    }
    best
}

// ── Harmony ──

/// One chord: onset time and sorted pitches.
struct Chord {
    t0: f64,
    pitches: Vec<i32>,
}

fn collect_chords(plan: &Plan) -> Vec<Chord> {
    let mut by_onset: BTreeMap<i64, Vec<i32>> = BTreeMap::new();
    for event in plan.channel_events(Channel::Harmony) {
        by_onset
            .entry((event.t0 * 1000.0).round() as i64)
            .or_default()
            .push(event.pitch.round() as i32);
    }
    by_onset
        .into_iter()
        .map(|(ms, mut pitches)| {
            pitches.sort_unstable();
            Chord {
                t0: ms as f64 / 1000.0,
                pitches,
            }
        })
        .collect()
}

pub fn score_harmony(plan: &Plan) -> HarmonyScores {
    let chords = collect_chords(plan);
    if chords.is_empty() {
        return HarmonyScores::default();
    }
    let bass = plan.channel_events(Channel::Bass);
    let roots: Vec<i32> = chords
        .iter()
        .map(|chord| {
            bass.iter()
                .find(|b| (b.t0 - chord.t0).abs() < 0.05)
                .map(|b| b.pitch.round() as i32)
                .unwrap_or(chord.pitches[0])
                .rem_euclid(12)
        })
        .collect();

    let progression = if roots.len() < 2 {
        0.0
    } else {
        let legal = roots
            .windows(2)
            .filter(|w| matches!(interval::class(w[1] - w[0]), 2 | 3 | 4 | 5 | 7 | 8 | 9 | 10))
            .count();
        legal as f64 / (roots.len() - 1) as f64
    };

    let voice_leading = if chords.len() < 2 {
        0.0
    } else {
        let movements: Vec<f64> = chords
            .windows(2)
            .map(|w| {
                let moves: Vec<f64> = w[1]
                    .pitches
                    .iter()
                    .map(|p| w[0].pitches.iter().map(|q| (p - q).abs()).min().unwrap_or(12) as f64)
                    .collect();
                mean(&moves)
            })
            .collect();
        (1.0 - (mean(&movements) - 2.0) / 8.0).clamp(0.0, 1.0)
    };

    let mut pairs = 0usize;
    let mut dissonant = 0usize;
    for chord in &chords {
        for (i, a) in chord.pitches.iter().enumerate() {
            for b in &chord.pitches[i + 1..] {
                pairs += 1;
                if interval::is_dissonant(b - a) {
                    dissonant += 1;
                }
            }
        }
    }
    let dissonance = if pairs == 0 { 0.0 } else { dissonant as f64 / pairs as f64 };
    let tension = (1.0 - (dissonance - 0.1).abs() * 2.5).clamp(0.0, 1.0);

    let distinct_roots: BTreeSet<i32> = roots.iter().copied().collect();
    let complexity = (distinct_roots.len() as f64 / 4.0).min(1.0);

    let tonic = Key::parse(&plan.key)
        .map(|k| k.tonic_pc as i32)
        .unwrap_or(roots[0]);
    let final_root = roots[roots.len() - 1];
    let resolution = if final_root == tonic {
        1.0
    } else if final_root == (tonic + 7) % 12 {
        0.5
    } else {
        0.2
    };

    HarmonyScores {
        progression,
        voice_leading,
        tension,
        complexity,
        resolution,
    }
}

// ── Rhythm ──

pub fn score_rhythm(plan: &Plan) -> RhythmScores {
    let beat = plan.beat_sec();
    let tempo_fit = if plan.bpm.is_finite() { band(plan.bpm, 60.0, 160.0, 40.0) } else { 0.0 };
    let diversity = onset_diversity(plan, beat);

    let hits = plan.channel_events(Channel::Rhythm);
    if hits.is_empty() || !beat.is_finite() || beat <= 0.0 {
        return RhythmScores {
            tempo_fit,
            diversity,
            ..RhythmScores::default()
        };
    }

    let eighth = beat / 2.0;
    // Unique onsets on the eighth grid, with their strongest velocity.
    let mut onsets: BTreeMap<i64, f64> = BTreeMap::new();
    for hit in &hits {
        let slot = (hit.t0 / eighth).round() as i64;
        let v = onsets.entry(slot).or_insert(0.0);
        *v = v.max(hit.velocity);
    }

    let offbeats = onsets.keys().filter(|s| s.rem_euclid(2) == 1).count();
    let syncopation = band(offbeats as f64 / onsets.len() as f64, 0.15, 0.6, 0.3);

    let mut bar_patterns: BTreeMap<i64, u8> = BTreeMap::new();
    for slot in onsets.keys() {
        *bar_patterns.entry(slot.div_euclid(8)).or_insert(0) |= 1 << slot.rem_euclid(8);
    }
    let mut pattern_counts: BTreeMap<u8, usize> = BTreeMap::new();
    for mask in bar_patterns.values() {
        *pattern_counts.entry(*mask).or_insert(0) += 1;
    }
    let most_common = pattern_counts.values().copied().max().unwrap_or(0);
    let groove = (most_common as f64 / bar_patterns.len() as f64 / 0.6).min(1.0);

    let (down, other): (Vec<(i64, f64)>, Vec<(i64, f64)>) =
        onsets.iter().map(|(s, v)| (*s, *v)).partition(|(s, _)| s.rem_euclid(8) == 0);
    let down_v = mean(&down.iter().map(|(_, v)| *v).collect::<Vec<_>>());
    let other_v = mean(&other.iter().map(|(_, v)| *v).collect::<Vec<_>>());
    let accent = if down.is_empty() {
        0.0
    } else {
        (0.5 + (down_v - other_v) * 2.5).clamp(0.0, 1.0)
    };

    RhythmScores {
        syncopation,
        groove,
        tempo_fit,
        diversity,
        accent,
    }
}

/// Distinct inter-onset intervals (quarter-beat quantum) across the melody
/// and percussion lines, out of four.
fn onset_diversity(plan: &Plan, beat: f64) -> f64 {
    if !beat.is_finite() || beat <= 0.0 {
        return 0.0;
    }
    let quantum = beat / 4.0;
    let mut classes: BTreeSet<i64> = BTreeSet::new();
    for channel in [Channel::Melody, Channel::Rhythm] {
        let mut onsets: Vec<i64> = plan
            .channel_events(channel)
            .iter()
            .map(|e| (e.t0 / quantum).round() as i64)
            .collect();
        onsets.dedup();
        classes.extend(onsets.windows(2).map(|w| w[1] - w[0]).filter(|&d| d > 0));
    }
    (classes.len() as f64 / 4.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::EventToken;
    use crate::planner::{PhrasePlanner, PlanStrategy};

    fn melody_plan(pitches: &[i32]) -> Plan {
        let mut plan = Plan::new("m", pitches.len() as f64 * 0.5, 120.0, "C ionian");
        for (i, &p) in pitches.iter().enumerate() {
            let t0 = i as f64 * 0.5;
            plan.push(EventToken::new(Channel::Melody, t0, t0 + 0.45, p as f64, 0.7));
        }
        plan
    }

    #[test]
    fn arch_melody_scores_high_arc() {
        let arch = melody_plan(&[60, 62, 64, 65, 67, 69, 71, 72, 71, 69, 67, 65, 64, 62, 60]);
        let flat_start = melody_plan(&[72, 71, 69, 67, 65, 64, 62, 60, 60, 60, 60, 60, 60, 60, 60]);
        assert!(score_melody(&arch).arc > 0.9);
        assert!(score_melody(&flat_start).arc < 0.3);
    }

    #[test]
    fn repeated_motif_is_detected() {
        let motif = melody_plan(&[60, 62, 64, 60, 62, 64, 60, 62, 64, 60, 62, 64]);
        let scores = score_melody(&motif);
        assert_eq!(scores.motif, 1.0);
    }

    #[test]
    fn all_steps_trigger_gaming_penalty() {
        // Monotonic scale: >85% steps, long run, but wide range.
        let scale = melody_plan(&[60, 62, 64, 65, 67, 69, 71, 72, 74, 76]);
        let scores = score_melody(&scale);
        assert!((scores.gaming_penalty - 0.5).abs() < 1e-12);
        assert!(scores.penalised() < scores.average());
    }

    #[test]
    fn narrow_range_is_penalised() {
        let narrow = melody_plan(&[60, 62, 60, 64, 60, 62, 60, 64]);
        let scores = score_melody(&narrow);
        assert!(scores.gaming_penalty >= 0.25);
        assert!(scores.range < 0.5);
    }

    #[test]
    fn monotonic_run_counts_moves() {
        assert_eq!(longest_monotonic_run(&[1, 1, 1, -1, 2, 2]), 3);
        assert_eq!(longest_monotonic_run(&[1, 0, 1]), 1);
        assert_eq!(longest_monotonic_run(&[]), 0);
    }

    #[test]
    fn entropy_bounds() {
        assert_eq!(contour_entropy(&[0, 0, 0]), 0.0);
        let uniform = contour_entropy(&[-5, -1, 0, 1, 5]);
        assert!((uniform - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cadence_resolves_to_tonic() {
        let mut plan = Plan::new("h", 4.0, 120.0, "C ionian");
        for (i, root) in [60, 65, 67, 60].iter().enumerate() {
            let t0 = i as f64;
            for offset in [0, 4, 7] {
                plan.push(EventToken::new(Channel::Harmony, t0, t0 + 1.0, (root + offset) as f64, 0.5));
            }
        }
        let scores = score_harmony(&plan);
        assert_eq!(scores.progression, 1.0);
        assert_eq!(scores.resolution, 1.0);
        assert!((scores.complexity - 0.75).abs() < 1e-12);
    }

    #[test]
    fn static_harmony_has_no_legal_progression() {
        let mut plan = Plan::new("h", 4.0, 120.0, "C ionian");
        for i in 0..4 {
            for p in [60, 64, 67] {
                plan.push(EventToken::new(Channel::Harmony, i as f64, i as f64 + 1.0, p as f64, 0.5));
            }
        }
        let scores = score_harmony(&plan);
        assert_eq!(scores.progression, 0.0);
        assert_eq!(scores.voice_leading, 1.0);
    }

    #[test]
    fn tempo_fit_band() {
        let mut plan = Plan::new("r", 4.0, 120.0, "C ionian");
        assert_eq!(score_rhythm(&plan).tempo_fit, 1.0);
        plan.bpm = 200.0;
        assert_eq!(score_rhythm(&plan).tempo_fit, 0.0);
    }

    #[test]
    fn reference_planner_passes_default_thresholds() {
        let plan = PhrasePlanner::default().plan(&[0.6, 0.5, 0.5, 0.6, 0.3, 0.5], None);
        let quality = evaluate(&plan, &RuleThresholds::default());
        assert!(quality.passed, "failing: {:?}", quality.failing);
        assert_eq!(quality.melody.gaming_penalty, 0.0);
        assert!(quality.aggregate > 0.45, "aggregate {}", quality.aggregate);
        assert!((quality.aggregate - score_plan(&plan)).abs() < 1e-12);
    }

    #[test]
    fn failing_lists_metrics_below_threshold() {
        let plan = melody_plan(&[60, 60, 60, 60]);
        let quality = evaluate(&plan, &RuleThresholds::default());
        assert!(!quality.passed);
        assert!(quality.failing.contains(&"melody_arc".to_string()));
        assert!(quality.failing.contains(&"harmony_progression".to_string()));
    }
}

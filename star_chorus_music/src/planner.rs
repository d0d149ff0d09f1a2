// Plan shaping: expanding a 6-D control vector into a full `Plan`.
//
// The cascade (cascade.rs) treats planning as a pluggable `PlanStrategy`:
// any pure function from `(vector, guidance)` to a `Plan` will do, as long as
// its output satisfies the Audition Gate's structural contract. This module
// defines that trait and the reference strategy, `PhrasePlanner`.
//
// PhrasePlanner works like a miniature form planner:
// - tempo and bar count are fitted so the last bar ends exactly on the target
//   duration;
// - the melody walks in scale degrees toward a global contour (an arch for high
//   `arc`, a plateau for low `arc`), stepping or leaping according to `step`
//   and the guidance leap cap, with leap recovery by step;
// - a four-note motif opens the first phrase and is restated at the start of
//   later phrases with probability driven by `motif`;
// - one triad per bar from a table of phrase progressions, ending with a
//   IV-V-I cadence; sevenths are added under high aspect tension;
// - bass doubles chord roots (plus fifths at higher density);
// - percussion follows one of eight bar templates, with anticipations pulled
//   onto the off-beat under `syncopation`.
//
// All choices draw from a `SeededRng` keyed by the formatted vector and
// guidance, so the planner is a pure function of its inputs.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use star_chorus_prng::{SeededRng, fnv1a32};

use crate::mode::{Key, Mode};
use crate::plan::{Channel, EventToken, Plan};

/// Number of dimensions in a control vector.
pub const PLAN_DIMS: usize = 6;

/// Model output driving one plan: `[arc, density, tempo, step, syncopation,
/// motif]`, each in [0, 1].
pub type ControlVector = [f64; PLAN_DIMS];

/// Indices into a `ControlVector`.
pub mod dim {
    pub const ARC: usize = 0;
    pub const DENSITY: usize = 1;
    pub const TEMPO: usize = 2;
    pub const STEP: usize = 3;
    pub const SYNCOPATION: usize = 4;
    pub const MOTIF: usize = 5;
}

/// Group ids at or above this value tie together the melody, bass and
/// percussion of one phrase. Harmony groups are bar indices below it.
pub const PHRASE_GROUP_BASE: u32 = 100_000;

/// Chart-derived bias applied on top of the control vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guidance {
    pub mode: Mode,
    /// Aspect tension in [0, 1]. Above 0.6 chords gain a seventh.
    pub tension: f64,
    /// Percussion template, 0..=7.
    pub rhythm_template: u8,
    /// Largest melodic leap, 1..=6; the walk may leap up to `leap_cap + 1`
    /// scale degrees.
    pub leap_cap: u8,
}

impl Default for Guidance {
    fn default() -> Self {
        Guidance {
            mode: Mode::Ionian,
            tension: 0.4,
            rhythm_template: 3,
            leap_cap: 5,
        }
    }
}

/// A deterministic expansion of a control vector into a plan.
pub trait PlanStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Must be a pure function of `vector` and `guidance`.
    fn plan(&self, vector: &ControlVector, guidance: Option<&Guidance>) -> Plan;
}

/// Clamp every dimension into [0, 1]; non-finite values become 0.
pub fn clamp_vector(vector: &ControlVector) -> ControlVector {
    vector.map(|x| if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 })
}

/// Chord-root progressions (scale degrees) for one four-bar phrase. Every
/// root movement here is a legal progression in the ionian, dorian,
/// mixolydian and aeolian modes, and each phrase ends on V so the next phrase
/// opens with V-I.
const PHRASE_PROGRESSIONS: [[i32; 4]; 4] = [[0, 5, 3, 4], [0, 3, 1, 4], [0, 3, 0, 4], [0, 2, 0, 4]];

/// Closing phrase: I-IV-V-I.
const CADENCE_PROGRESSION: [i32; 4] = [0, 3, 4, 0];

const KICK: f64 = 36.0;
const RIM: f64 = 37.0;
const SNARE: f64 = 38.0;
const HAT: f64 = 42.0;

/// Eight percussion templates as `(eighth-note slot, drum key)` hits per bar.
const RHYTHM_TEMPLATES: [&[(u8, f64)]; 8] = [
    // 0: four on the floor
    &[(0, KICK), (1, HAT), (2, KICK), (3, HAT), (4, KICK), (5, HAT), (6, KICK), (7, HAT)],
    // 1: backbeat
    &[(0, KICK), (2, SNARE), (4, KICK), (6, SNARE), (1, HAT), (3, HAT), (5, HAT), (7, HAT)],
    // 2: half-time
    &[(0, KICK), (4, SNARE), (2, HAT), (6, HAT)],
    // 3: push
    &[(0, KICK), (3, KICK), (2, SNARE), (6, SNARE), (1, HAT), (5, HAT), (7, HAT)],
    // 4: tresillo
    &[(0, KICK), (3, RIM), (6, RIM), (4, KICK)],
    // 5: broken
    &[(0, KICK), (5, KICK), (2, SNARE), (6, SNARE), (1, HAT), (3, HAT), (4, HAT), (7, HAT)],
    // 6: sparse
    &[(0, KICK), (6, RIM)],
    // 7: driving
    &[(0, KICK), (2, KICK), (4, KICK), (6, KICK), (2, SNARE), (6, SNARE), (1, HAT), (3, HAT), (5, HAT), (7, HAT)],
];

/// Display names of the percussion templates, by id.
pub const RHYTHM_TEMPLATE_NAMES: [&str; 8] = [
    "four on the floor",
    "backbeat",
    "half-time",
    "push",
    "tresillo",
    "broken",
    "sparse",
    "driving",
];

/// Reference planning strategy: phrase-structured melody over a bar-wise
/// harmonic progression.
#[derive(Debug, Clone)]
pub struct PhrasePlanner {
    /// Target plan duration in seconds.
    pub duration_sec: f64,
    pub bars_per_phrase: usize,
}

impl Default for PhrasePlanner {
    fn default() -> Self {
        PhrasePlanner {
            duration_sec: 60.0,
            bars_per_phrase: 4,
        }
    }
}

/// Bar grid shared by all channel builders.
struct Layout {
    num_bars: usize,
    bar_len: f64,
    duration: f64,
}

impl Layout {
    fn bar_start(&self, bar: usize) -> f64 {
        bar as f64 * self.bar_len
    }

    fn bar_end(&self, bar: usize) -> f64 {
        if bar + 1 >= self.num_bars {
            self.duration
        } else {
            (bar + 1) as f64 * self.bar_len
        }
    }

    fn beat_len(&self) -> f64 {
        self.bar_len / 4.0
    }
}

impl PlanStrategy for PhrasePlanner {
    fn name(&self) -> &str {
        "phrase-planner"
    }

    fn plan(&self, vector: &ControlVector, guidance: Option<&Guidance>) -> Plan {
        let v = clamp_vector(vector);
        let g = guidance.cloned().unwrap_or_default();
        let seed = format!(
            "plan|{:.6}|{:.6}|{:.6}|{:.6}|{:.6}|{:.6}|{}|{:.6}|{}|{}",
            v[0],
            v[1],
            v[2],
            v[3],
            v[4],
            v[5],
            g.mode.name(),
            g.tension,
            g.rhythm_template,
            g.leap_cap
        );
        let mut rng = SeededRng::from_seed_str(&seed);

        let nominal_bpm = 64.0 + v[dim::TEMPO] * 96.0;
        let nominal_bar = 240.0 / nominal_bpm;
        let duration = self.duration_sec.max(1.0);
        let num_bars = ((duration / nominal_bar).round() as usize).max(4);
        let layout = Layout {
            num_bars,
            bar_len: duration / num_bars as f64,
            duration,
        };
        let bpm = 240.0 / layout.bar_len;

        let key = Key::new(g.mode, rng.range_u32(0, 12) as u8);
        let mut plan = Plan::new(format!("phrase-{:08x}", fnv1a32(seed.as_bytes())), duration, bpm, key.name());

        let roots = self.chord_roots(&layout, &mut rng);
        self.write_melody(&mut plan, &layout, &key, &v, &g, &mut rng);
        write_harmony(&mut plan, &layout, &key, &roots, g.tension);
        write_bass(&mut plan, &layout, &key, &roots, v[dim::DENSITY]);
        write_rhythm(&mut plan, &layout, g.rhythm_template, v[dim::SYNCOPATION], &mut rng);
        group_phrases(&mut plan, &layout, self.bars_per_phrase.max(1));

        plan.sort_events();
        plan
    }
}

impl PhrasePlanner {
    /// One chord root (scale degree) per bar.
    fn chord_roots(&self, layout: &Layout, rng: &mut SeededRng) -> Vec<i32> {
        let bpp = self.bars_per_phrase.max(1);
        let num_phrases = layout.num_bars.div_ceil(bpp);
        let progressions: Vec<[i32; 4]> = (0..num_phrases)
            .map(|_| *rng.pick(&PHRASE_PROGRESSIONS))
            .collect();
        let cadence_start = layout.num_bars.saturating_sub(CADENCE_PROGRESSION.len());

        (0..layout.num_bars)
            .map(|bar| {
                if bar >= cadence_start {
                    CADENCE_PROGRESSION[bar - cadence_start]
                } else {
                    progressions[bar / bpp][(bar % bpp) % 4]
                }
            })
            .collect()
    }

    fn write_melody(
        &self,
        plan: &mut Plan,
        layout: &Layout,
        key: &Key,
        v: &ControlVector,
        g: &Guidance,
        rng: &mut SeededRng,
    ) {
        let bpp = self.bars_per_phrase.max(1);
        let beat = layout.beat_len();
        let total_beats = (layout.num_bars * 4) as f64;
        let amplitude = 3 + (v[dim::ARC] * 6.0).round() as i32;
        let max_leap = g.leap_cap.clamp(1, 6) as i32 + 1;
        let step_p = 0.35 + 0.6 * v[dim::STEP];
        let split_p = 0.15 + 0.7 * v[dim::DENSITY];
        let hold_p = (1.0 - v[dim::DENSITY]) * 0.3;
        let motif_p = 0.25 + 0.7 * v[dim::MOTIF];
        let octave = if key.tonic_pc < 7 { 5 } else { 4 };

        // Four-note motif as degree offsets from its first note.
        let mut motif = vec![0i32];
        for _ in 0..3 {
            let last = motif[motif.len() - 1];
            let size = if rng.random_bool(0.7) { 1 } else { 2 };
            let dir = if rng.random_bool(0.5) { 1 } else { -1 };
            motif.push(last + size * dir);
        }

        let mut walker = MelodyWalker {
            degree: 0,
            recovery: None,
            low: -2,
            high: amplitude + 2,
        };
        let num_phrases = layout.num_bars.div_ceil(bpp);

        for phrase in 0..num_phrases {
            let first_bar = phrase * bpp;
            let phrase_beats = ((layout.num_bars - first_bar).min(bpp) * 4) as f64;
            let origin = first_bar as f64 * 4.0;
            let is_last_phrase = phrase + 1 == num_phrases;
            let mut b = 0.0;

            if phrase_beats >= 8.0 && (phrase == 0 || rng.random_bool(motif_p)) {
                let anchor = contour_target(v[dim::ARC], amplitude, origin / total_beats).round() as i32;
                for &offset in &motif {
                    walker.degree = (anchor + offset).clamp(walker.low, walker.high);
                    push_melody_note(plan, layout, key, octave, walker.degree, origin + b, 1.0, beat, amplitude);
                    b += 1.0;
                }
                walker.recovery = None;
            }

            // Last beat of every phrase is a breath.
            let end = phrase_beats - 1.0;
            while b < end - 1e-9 {
                let remaining = end - b;
                let step: f64 = if remaining >= 2.0 && rng.random_bool(hold_p) {
                    2.0
                } else if rng.random_bool(split_p) {
                    0.5
                } else {
                    1.0
                };
                let dur = step.min(remaining);

                let x = (origin + b) / total_beats;
                let target = contour_target(v[dim::ARC], amplitude, x).round() as i32;
                let closing = is_last_phrase && remaining <= dur + 1e-9;
                if closing {
                    // Land on the tonic nearest the current degree.
                    walker.degree = ((walker.degree as f64 / 7.0).round() as i32 * 7).clamp(0, 7);
                } else {
                    walker.advance(target, step_p, max_leap, rng);
                }
                push_melody_note(plan, layout, key, octave, walker.degree, origin + b, dur, beat, amplitude);
                b += dur;
            }
        }
    }
}

/// Scale-degree walk toward a moving contour target.
struct MelodyWalker {
    degree: i32,
    /// Direction of the recovery step owed after a leap.
    recovery: Option<i32>,
    low: i32,
    high: i32,
}

impl MelodyWalker {
    fn advance(&mut self, target: i32, step_p: f64, max_leap: i32, rng: &mut SeededRng) {
        if let Some(dir) = self.recovery.take() {
            self.degree = (self.degree + dir).clamp(self.low, self.high);
            return;
        }
        let diff = target - self.degree;
        if diff == 0 && rng.random_bool(0.2) {
            return;
        }
        let dir = match diff.signum() {
            0 => {
                if rng.random_bool(0.5) {
                    1
                } else {
                    -1
                }
            }
            s => s,
        };
        if rng.random_bool(step_p) {
            self.degree += dir;
        } else {
            // Overshoot the target by at most one degree.
            let size = (rng.range_u32(2, max_leap as u32 + 1) as i32).min((diff.abs() + 1).max(2));
            self.degree += dir * size;
            self.recovery = Some(-dir);
        }
        self.degree = self.degree.clamp(self.low, self.high);
    }
}

/// Contour height in scale degrees at position `x` in [0, 1]. High `arc`
/// gives a single rise-peak-release arch; low `arc` flattens to a plateau.
fn contour_target(arc: f64, amplitude: i32, x: f64) -> f64 {
    let arch = (PI * x.clamp(0.0, 1.0)).sin();
    amplitude as f64 * (arc * arch + (1.0 - arc) * 0.5)
}

#[allow(clippy::too_many_arguments)]
fn push_melody_note(
    plan: &mut Plan,
    layout: &Layout,
    key: &Key,
    octave: i32,
    degree: i32,
    start_beat: f64,
    beats: f64,
    beat: f64,
    amplitude: i32,
) {
    let t0 = start_beat * beat;
    let t1 = (t0 + beats * beat * 0.95).min(layout.duration);
    let height = (degree as f64 / amplitude.max(1) as f64).clamp(0.0, 1.0);
    let downbeat = (start_beat % 4.0).abs() < 1e-9;
    let velocity = (0.55 + 0.3 * height + if downbeat { 0.05 } else { 0.0 }).min(1.0);
    let pitch = key.degree_to_pitch(degree, octave) as f64;
    plan.push(EventToken::new(Channel::Melody, t0, t1, pitch, velocity));
}

fn write_harmony(plan: &mut Plan, layout: &Layout, key: &Key, roots: &[i32], tension: f64) {
    let (low, high) = Channel::Harmony.range();
    let mut previous_center: Option<f64> = None;

    for (bar, &root) in roots.iter().enumerate() {
        let mut degrees = vec![root, root + 2, root + 4];
        if tension > 0.6 {
            degrees.push(root + 6);
        }
        let center = previous_center.unwrap_or(key.degree_to_pitch(2, 4) as f64);
        let mut pitches: Vec<i32> = degrees
            .iter()
            .map(|&d| {
                let base = key.degree_to_pitch(d, 4);
                // Closest octave placement to the previous chord.
                [base - 12, base, base + 12]
                    .into_iter()
                    .filter(|p| (low..=high).contains(p))
                    .min_by(|a, b| {
                        (*a as f64 - center)
                            .abs()
                            .total_cmp(&(*b as f64 - center).abs())
                    })
                    .unwrap_or(base)
            })
            .collect();
        pitches.sort_unstable();
        pitches.dedup();
        previous_center = Some(pitches.iter().sum::<i32>() as f64 / pitches.len() as f64);

        let t0 = layout.bar_start(bar);
        let t1 = layout.bar_end(bar);
        let velocity = 0.45 + 0.2 * tension.clamp(0.0, 1.0);
        for pitch in pitches {
            plan.push(EventToken::new(Channel::Harmony, t0, t1, pitch as f64, velocity).with_group(bar as u32));
        }
    }
}

fn write_bass(plan: &mut Plan, layout: &Layout, key: &Key, roots: &[i32], density: f64) {
    let (_, high) = Channel::Bass.range();
    let fit = |p: i32| if p > high { p - 12 } else { p };
    let beat = layout.beat_len();

    for (bar, &root) in roots.iter().enumerate() {
        let start = layout.bar_start(bar);
        let root_pitch = fit(key.degree_to_pitch(root, 3)) as f64;
        if density > 0.5 {
            let fifth = fit(key.degree_to_pitch(root + 4, 3)) as f64;
            plan.push(EventToken::new(Channel::Bass, start, start + 2.0 * beat * 0.95, root_pitch, 0.7));
            plan.push(EventToken::new(Channel::Bass, start + 2.0 * beat, start + 4.0 * beat * 0.95, fifth, 0.6));
        } else {
            plan.push(EventToken::new(Channel::Bass, start, start + 4.0 * beat * 0.95, root_pitch, 0.7));
        }
    }
}

fn write_rhythm(plan: &mut Plan, layout: &Layout, template: u8, syncopation: f64, rng: &mut SeededRng) {
    let hits = RHYTHM_TEMPLATES[(template as usize) % RHYTHM_TEMPLATES.len()];
    let eighth = layout.bar_len / 8.0;
    let anticipate_p = syncopation * 0.8;

    for bar in 0..layout.num_bars {
        let start = layout.bar_start(bar);
        // Pull the beat-3 hits one eighth early.
        let anticipate = bar + 1 < layout.num_bars && rng.random_bool(anticipate_p);
        for &(slot, drum) in hits {
            let slot = if anticipate && slot == 4 { 3 } else { slot };
            let velocity = match (slot, drum) {
                (0, _) => 0.9,
                (_, d) if d == KICK => 0.75,
                (_, d) if d == SNARE => 0.7,
                (_, d) if d == RIM => 0.55,
                _ => 0.45,
            };
            let t0 = start + slot as f64 * eighth;
            plan.push(EventToken::new(Channel::Rhythm, t0, t0 + eighth * 0.5, drum, velocity));
        }
    }
}

/// Melody, bass and percussion sound together by construction, so each
/// phrase's layers share one group and survive the gate's overlap trim.
/// Nothing crosses a phrase boundary: melody phrases end on a rest, bass and
/// percussion stay inside their bar.
fn group_phrases(plan: &mut Plan, layout: &Layout, bars_per_phrase: usize) {
    for event in &mut plan.events {
        if event.channel == Channel::Harmony {
            continue;
        }
        let mid = 0.5 * (event.t0 + event.t1);
        let bar = ((mid / layout.bar_len) as usize).min(layout.num_bars - 1);
        event.group = Some(PHRASE_GROUP_BASE + (bar / bars_per_phrase) as u32);
    }
}

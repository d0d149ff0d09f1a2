// Text realization from atoms and the gate report.
//
// Two paths:
// - success (calibrated gate passed): short/long/bullets from seeded
//   templates, plus overlay contrast and sandbox hints where they apply.
// - fail-closed (calibrated gate failed): `short` is empty and `long` and
//   `bullets` carry only failing gate names and the knob changes that
//   address them. No descriptive wording at all.

use star_chorus_music::audition::{GateFlags, GateReport, GateThresholds};
use star_chorus_prng::stable_index;
use star_chorus_protocol::{ComposeMode, ControlSurfacePayload, TextExplainer};

use super::atoms::{ExplainerAtoms, generate_atoms};
use super::overlay::contrast_phrases;
use crate::ephemeris::ElementWeights;

pub const FAIL_CLOSED_TEMPLATE: &str = "fail-closed";

/// Words that describe a composition. None may appear on the fail-closed
/// path.
pub const FORBIDDEN_ADJECTIVES: &[&str] = &[
    "beautiful", "lush", "soaring", "vibrant", "dreamy", "haunting", "gentle", "bright", "dark", "warm",
    "radiant", "lively", "calm", "energetic", "melancholic", "uplifting", "driving", "flowing", "serene",
    "smooth", "bold", "airy", "dense", "sparse", "balanced", "rich", "catchy", "playful", "epic", "moody",
];

/// Knob hint for one failing calibrated sub-gate.
pub fn knob_hint(gate: &str) -> &'static str {
    match gate {
        "melody_arc" => "arc_shape +0.1",
        "melody_step_leap" => "step_bias +0.1 or leap_cap → 3",
        "melody_narrative" => "motif_rate +0.1",
        "rhythm_diversity" => "rhythm_template_id → 5 or syncopation_bias +0.1",
        _ => "arc_shape +0.1 and motif_rate +0.1",
    }
}

/// Suggestion for one failing strict sub-gate, sandbox only.
pub fn sandbox_hint(gate: &str) -> Option<&'static str> {
    match gate {
        "melody_arc" => Some("Try arc_shape +0.1 for a clearer peak"),
        "melody_step_leap" => Some("Try step_bias +0.1 or leap_cap → 3"),
        "melody_narrative" => Some("Try motif_rate +0.1 so ideas come back more often"),
        "rhythm_diversity" => Some("Try rhythm_template_id → 5 or syncopation_bias +0.1"),
        _ => None,
    }
}

/// Natal side of an overlay.
#[derive(Debug, Clone, Copy)]
pub struct NatalContext<'a> {
    pub payload: &'a ControlSurfacePayload,
    pub calibrated: &'a GateFlags,
}

/// Everything the realizer reads for one composition.
#[derive(Debug, Clone, Copy)]
pub struct ExplainInput<'a> {
    pub mode: ComposeMode,
    pub payload: &'a ControlSurfacePayload,
    pub weights: &'a ElementWeights,
    pub report: &'a GateReport,
    pub natal: Option<NatalContext<'a>>,
}

const SHORT_TEMPLATES: &[fn(&ExplainerAtoms) -> String] = &[
    |a| format!("A {} with {}.", a.arc_desc, a.movement),
    |a| format!("A {} over a {}.", a.arc_desc, a.rhythm_feel),
    |a| format!("{} shaped as a {}.", capitalize(&a.movement), a.arc_desc),
];

const LONG_TEMPLATES: &[fn(&ExplainerAtoms) -> String] = &[
    |a| {
        format!(
            "The melody follows a {} with {}. Underneath, a {} keeps time in a {}, carrying {}. The chart adds {}.",
            a.arc_desc, a.movement, a.rhythm_feel, a.density_desc, a.motif_desc, a.astro_color
        )
    },
    |a| {
        format!(
            "Built on a {} and a {}, the piece moves with {} and {}. Its sky gives it {}.",
            a.rhythm_feel, a.density_desc, a.movement, a.motif_desc, a.astro_color
        )
    },
];

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Realize the text for one composition.
pub fn realize(input: &ExplainInput<'_>) -> TextExplainer {
    let seed = input.payload.hash.clone();
    if !input.report.calibrated.overall {
        return fail_closed(input.report, seed);
    }

    let atoms = generate_atoms(input.payload, input.weights);
    let short_index = stable_index(&format!("{seed}short"), SHORT_TEMPLATES.len());
    let long_index = stable_index(&format!("{seed}long"), LONG_TEMPLATES.len());
    let short = SHORT_TEMPLATES[short_index](&atoms);
    let mut long = LONG_TEMPLATES[long_index](&atoms);

    let mut bullets = vec![
        format!("Arc: {}", atoms.arc_desc),
        format!("Movement: {}", atoms.movement),
        format!("Rhythm: {}", atoms.rhythm_feel),
        format!("Texture: {}", atoms.density_desc),
        format!("Motif: {}", atoms.motif_desc),
        format!("Sky: {}", atoms.astro_color),
    ];

    let natal = input.natal.filter(|n| input.mode == ComposeMode::Overlay && n.calibrated.overall);
    if let Some(natal) = natal {
        let phrases = contrast_phrases(natal.payload, input.payload);
        if !phrases.is_empty() {
            let sentence = format!("Compared with the natal chart: {}.", phrases.join("; "));
            long = format!("{long} {sentence}");
            bullets.push(sentence);
        }
    }

    if input.mode == ComposeMode::Sandbox {
        bullets.extend(
            input
                .report
                .strict
                .failing()
                .into_iter()
                .filter_map(sandbox_hint)
                .map(str::to_string),
        );
    }

    TextExplainer {
        short,
        long,
        bullets,
        template_id: format!("s{short_index}.l{long_index}"),
        seed,
    }
}

fn fail_closed(report: &GateReport, seed: String) -> TextExplainer {
    let failing = report.calibrated.failing();
    let bullets: Vec<String> = if failing.is_empty() {
        let gate = weakest_gate(report);
        vec![format!("{gate}: {}", knob_hint(gate))]
    } else {
        failing.iter().map(|gate| format!("{gate}: {}", knob_hint(gate))).collect()
    };
    let long = format!("Quality gate not met. Adjust {}.", bullets.join("; "));
    TextExplainer {
        short: String::new(),
        long,
        bullets,
        template_id: FAIL_CLOSED_TEMPLATE.into(),
        seed,
    }
}

/// Sub-gate with the smallest margin over its calibrated threshold. Used when
/// the gate was forced shut while every sub-gate passed. Ties go to the
/// earlier gate.
fn weakest_gate(report: &GateReport) -> &'static str {
    let floors = GateThresholds::calibrated();
    [
        ("melody_arc", floors.melody_arc),
        ("melody_step_leap", floors.melody_step_leap),
        ("melody_narrative", floors.melody_narrative),
        ("rhythm_diversity", floors.rhythm_diversity),
    ]
    .into_iter()
    .map(|(gate, floor)| (gate, report.scores.get(gate).copied().unwrap_or(0.0) - floor))
    .min_by(|a, b| a.1.total_cmp(&b.1))
    .map_or("melody_arc", |(gate, _)| gate)
}

/// Whether `text` contains any forbidden adjective as a whole word.
pub fn contains_forbidden(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .flat_map(|word| word.split('-'))
        .any(|word| FORBIDDEN_ADJECTIVES.iter().any(|f| word.eq_ignore_ascii_case(f)))
}

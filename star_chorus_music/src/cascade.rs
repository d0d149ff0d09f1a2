// Jitter-and-rerank plan generation.
//
// A single model output is not guaranteed to expand into a plan that clears
// the critics, so the cascade samples a small seeded neighbourhood around it
// and keeps the best candidate:
//
// 1. A `SeededRng` is keyed by the chart context hash (literal "seed" when
//    there is no context).
// 2. Candidate 0 is the clamped base vector; candidates 1..k add
//    U[-sigma, sigma] to every dimension and clamp back to [0, 1].
// 3. Each candidate is expanded by the injected `PlanStrategy` and scored
//    with `critics::score_plan`. Scoring runs on rayon; the ordered collect
//    keeps results in candidate order regardless of scheduling.
// 4. Candidates are stably sorted by descending score. If the best is below
//    `min_quality`, `PlanError::BelowThreshold` carries every score.
//
// The whole cascade is a pure function of (vector, context, strategy,
// config): retrying a rejected request reproduces the same rejection.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use star_chorus_prng::SeededRng;
use thiserror::Error;
use tracing::{debug, info};

use crate::critics::score_plan;
use crate::plan::Plan;
use crate::planner::{ControlVector, Guidance, PlanStrategy, clamp_vector};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Number of candidates including the unperturbed base.
    pub k: usize,
    /// Half-width of the uniform jitter per dimension.
    pub sigma: f64,
    /// Quality floor for the best candidate.
    pub min_quality: f64,
    /// Provenance source tag, reported as "{source}+rerank".
    pub source: String,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        CascadeConfig {
            k: 5,
            sigma: 0.10,
            min_quality: 0.45,
            source: "student".into(),
        }
    }
}

/// Chart-derived context for one cascade run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartContext {
    pub hash: String,
    pub guidance: Option<Guidance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub index: usize,
    pub score: f64,
    pub vector: ControlVector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeDiagnostics {
    /// One entry per candidate, in candidate order.
    pub scores: Vec<CandidateScore>,
    pub model_version: String,
    pub chosen_index: usize,
}

#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    pub plan: Plan,
    pub quality: f64,
    pub provenance: String,
    pub diagnostics: CascadeDiagnostics,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("all candidates scored below the quality floor {floor}")]
    BelowThreshold {
        floor: f64,
        diagnostics: Vec<CandidateScore>,
    },
    #[error("cascade configured with zero candidates")]
    EmptyCandidates,
}

impl PlanError {
    /// HTTP-style status for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            PlanError::BelowThreshold { .. } => 422,
            PlanError::EmptyCandidates => 500,
        }
    }
}

/// The base vector followed by `k - 1` jittered copies, all within [0, 1].
pub fn jitter_candidates(base: &ControlVector, k: usize, sigma: f64, rng: &mut SeededRng) -> Vec<ControlVector> {
    let base = clamp_vector(base);
    let sigma = if sigma.is_finite() { sigma.abs() } else { 0.0 };
    let mut candidates = Vec::with_capacity(k);
    if k == 0 {
        return candidates;
    }
    candidates.push(base);
    for _ in 1..k {
        let jittered = base.map(|x| {
            let noise = if sigma > 0.0 { rng.range_f64(-sigma, sigma) } else { 0.0 };
            (x + noise).clamp(0.0, 1.0)
        });
        candidates.push(jittered);
    }
    candidates
}

/// Expand, score and rerank candidates around `vector`.
pub fn generate_plan(
    vector: &ControlVector,
    context: Option<&ChartContext>,
    strategy: &dyn PlanStrategy,
    config: &CascadeConfig,
    model_version: &str,
) -> Result<CascadeOutcome, PlanError> {
    let seed = context.map_or("seed", |c| c.hash.as_str());
    let guidance = context.and_then(|c| c.guidance.as_ref());
    let mut rng = SeededRng::from_seed_str(seed);
    let candidates = jitter_candidates(vector, config.k, config.sigma, &mut rng);
    if candidates.is_empty() {
        return Err(PlanError::EmptyCandidates);
    }

    let mut scored: Vec<(usize, Plan, f64)> = candidates
        .par_iter()
        .enumerate()
        .map(|(index, candidate)| {
            let mut plan = strategy.plan(candidate, guidance);
            plan.id = format!("{seed}-c{index}");
            let score = score_plan(&plan);
            (index, plan, if score.is_finite() { score } else { 0.0 })
        })
        .collect();

    let diagnostics: Vec<CandidateScore> = scored
        .iter()
        .map(|(index, _, score)| CandidateScore {
            index: *index,
            score: *score,
            vector: candidates[*index],
        })
        .collect();
    for entry in &diagnostics {
        debug!(index = entry.index, score = entry.score, strategy = strategy.name(), "candidate scored");
    }

    scored.sort_by(|a, b| b.2.total_cmp(&a.2));
    let (chosen_index, plan, quality) = scored.swap_remove(0);

    if quality < config.min_quality {
        info!(best = quality, floor = config.min_quality, "all candidates rejected");
        return Err(PlanError::BelowThreshold {
            floor: config.min_quality,
            diagnostics,
        });
    }

    info!(chosen = chosen_index, quality, candidates = diagnostics.len(), "plan selected");
    Ok(CascadeOutcome {
        plan,
        quality,
        provenance: format!("{}+rerank", config.source),
        diagnostics: CascadeDiagnostics {
            scores: diagnostics,
            model_version: model_version.to_string(),
            chosen_index,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Channel, EventToken};
    use crate::planner::PhrasePlanner;

    /// Ignores its input and emits one repeated note over a static chord.
    struct FlatStrategy;

    impl PlanStrategy for FlatStrategy {
        fn name(&self) -> &str {
            "flat"
        }

        fn plan(&self, _vector: &ControlVector, _guidance: Option<&Guidance>) -> Plan {
            let mut plan = Plan::new("flat", 16.0, 120.0, "C ionian");
            for i in 0..16 {
                let t0 = i as f64;
                plan.push(EventToken::new(Channel::Melody, t0, t0 + 0.9, 60.0, 0.6));
                plan.push(EventToken::new(Channel::Harmony, t0, t0 + 1.0, 48.0, 0.5).with_group(i));
            }
            plan
        }
    }

    fn context(hash: &str) -> ChartContext {
        ChartContext {
            hash: hash.into(),
            guidance: None,
        }
    }

    #[test]
    fn jitter_stays_in_unit_interval() {
        let mut rng = SeededRng::from_seed_str("bounds");
        for base in [[0.0; 6], [1.0; 6], [0.5, 0.0, 1.0, 0.95, 0.05, 0.5]] {
            for sigma in [0.1, 0.5, 2.0] {
                for candidate in jitter_candidates(&base, 8, sigma, &mut rng) {
                    assert!(candidate.iter().all(|x| (0.0..=1.0).contains(x)), "{candidate:?}");
                }
            }
        }
    }

    #[test]
    fn first_candidate_is_the_base() {
        let mut rng = SeededRng::from_seed_str("base");
        let base = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let candidates = jitter_candidates(&base, 5, 0.1, &mut rng);
        assert_eq!(candidates.len(), 5);
        assert_eq!(candidates[0], base);
        for c in &candidates[1..] {
            for (x, b) in c.iter().zip(&base) {
                assert!((x - b).abs() <= 0.1);
            }
        }
    }

    #[test]
    fn zero_sigma_repeats_the_base() {
        let mut rng = SeededRng::from_seed_str("flat");
        let candidates = jitter_candidates(&[0.3; 6], 3, 0.0, &mut rng);
        assert!(candidates.iter().all(|c| *c == [0.3; 6]));
    }

    #[test]
    fn cascade_is_deterministic() {
        let planner = PhrasePlanner::default();
        let config = CascadeConfig::default();
        let ctx = context("abc123");
        let a = generate_plan(&[0.6, 0.5, 0.5, 0.6, 0.3, 0.5], Some(&ctx), &planner, &config, "v1").unwrap();
        let b = generate_plan(&[0.6, 0.5, 0.5, 0.6, 0.3, 0.5], Some(&ctx), &planner, &config, "v1").unwrap();
        assert_eq!(a.plan, b.plan);
        assert_eq!(a.diagnostics, b.diagnostics);
        assert_eq!(a.provenance, "student+rerank");
        assert_eq!(a.diagnostics.scores.len(), 5);
        assert_eq!(a.diagnostics.model_version, "v1");
    }

    #[test]
    fn best_candidate_is_chosen() {
        let outcome = generate_plan(
            &[0.6, 0.5, 0.5, 0.6, 0.3, 0.5],
            None,
            &PhrasePlanner::default(),
            &CascadeConfig::default(),
            "v1",
        )
        .unwrap();
        let best = outcome
            .diagnostics
            .scores
            .iter()
            .map(|s| s.score)
            .fold(f64::MIN, f64::max);
        assert_eq!(outcome.quality, best);
        assert_eq!(outcome.diagnostics.scores[outcome.diagnostics.chosen_index].score, best);
        assert!(outcome.plan.id.starts_with("seed-c"));
    }

    #[test]
    fn degenerate_candidates_exhaust_quality() {
        let config = CascadeConfig::default();
        let err = generate_plan(&[0.0; 6], Some(&context("x")), &FlatStrategy, &config, "v1").unwrap_err();
        assert_eq!(err.status_code(), 422);
        match err {
            PlanError::BelowThreshold { floor, diagnostics } => {
                assert_eq!(floor, 0.45);
                assert_eq!(diagnostics.len(), config.k);
                assert!(diagnostics.iter().all(|d| d.score < floor));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_candidates_is_an_error() {
        let config = CascadeConfig { k: 0, ..CascadeConfig::default() };
        let err = generate_plan(&[0.5; 6], None, &PhrasePlanner::default(), &config, "v1").unwrap_err();
        assert_eq!(err, PlanError::EmptyCandidates);
    }
}

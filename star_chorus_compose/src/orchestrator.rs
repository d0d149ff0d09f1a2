// The compose pipeline.
//
// `Composer` is an explicitly constructed service. It owns the config and
// holds every collaborator behind a trait object: student model, planning
// strategy, ephemeris provider, idempotency cache, match cache. Defaults are
// the in-process implementations; tests and deployments swap them with the
// `with_*` builders.
//
// One request runs, in order:
//   1. normalize (missing mode is sandbox with empty controls) and validate
//   2. per-client rate limit
//   3. idempotency lookup on sha256(canonical request + model version)
//   4. control surface for the mode
//   5. control features, then student inference to a plan vector
//   6. jitter-and-rerank cascade (a quality exhaustion propagates as 422)
//   7. Audition Gate seeded by the payload hash, then the forceFail override
//   8. overlay only: natal plan through the same cascade and gate
//   9. explainer text and explanation document
//  10. mock audio and optional viz descriptors
//  11. independent digests, artifacts, cache store, one log record
//
// Every seeded draw uses its own generator built from a derived seed, so no
// concern perturbs another and concurrent requests cannot interfere.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use star_chorus_music::audition::{GateFlags, GateReport, audition};
use star_chorus_music::cascade::{CascadeOutcome, ChartContext, generate_plan};
use star_chorus_music::mode::Mode;
use star_chorus_music::plan::Plan;
use star_chorus_music::planner::{Guidance, PhrasePlanner, PlanStrategy};
use star_chorus_prng::{SeededRng, derive_seed};
use star_chorus_protocol::{
    Artifacts, AudioDescriptor, ComposeMode, ComposeRequest, ComposeResponse, ControlOverrides,
    ControlSurfacePayload, Element, FieldError, GateFlagsBody, GateReportBody, Hashes, Provenance, TextBody,
    VizDescriptor,
};
use tracing::{debug, info, warn};

use crate::cache::{ComposeCache, InMemoryCache};
use crate::config::ComposeConfig;
use crate::controls::{
    AstroProfile, apply_overrides, blend_compatibility, match_key, sandbox_default, sky_payload, validate_point,
};
use crate::ephemeris::{ElementWeights, EphemerisProvider, MockEphemeris, SkyPoint};
use crate::error::ComposeError;
use crate::explainer::{ExplainInput, NatalContext, explanation_doc, realize};
use crate::features::{control_features, encode_features, feature_digest};
use crate::hashing::{canonical_json, json_digest, round6, sha256_hex};
use crate::model::{LinearStudentModel, StudentModel};
use crate::rate_limit::FixedWindowLimiter;

/// File name of the JSONL compose log inside `log_dir`.
pub const COMPOSE_LOG_FILE: &str = "compose.jsonl";

/// A response plus the plan behind it. `plan` is `None` on a cache hit.
#[derive(Debug, Clone)]
pub struct Composition {
    pub response: ComposeResponse,
    pub plan: Option<Plan>,
    pub cache_hit: bool,
}

/// Control surface for one request, before any planning.
#[derive(Debug, Clone)]
struct Surface {
    payload: ControlSurfacePayload,
    profile: AstroProfile,
    chart_hash: String,
    natal: Option<ControlSurfacePayload>,
}

pub struct Composer {
    config: ComposeConfig,
    model: Arc<dyn StudentModel>,
    strategy: Arc<dyn PlanStrategy>,
    ephemeris: Arc<dyn EphemerisProvider>,
    cache: Arc<dyn ComposeCache<ComposeResponse>>,
    match_cache: Arc<dyn ComposeCache<ControlSurfacePayload>>,
    limiter: FixedWindowLimiter,
}

impl Composer {
    pub fn new(config: ComposeConfig) -> Self {
        let strategy = PhrasePlanner {
            duration_sec: config.duration_sec,
            ..PhrasePlanner::default()
        };
        Composer {
            limiter: FixedWindowLimiter::new(config.rate_limit.clone()),
            model: Arc::new(LinearStudentModel::reference()),
            strategy: Arc::new(strategy),
            ephemeris: Arc::new(MockEphemeris),
            cache: Arc::new(InMemoryCache::new()),
            match_cache: Arc::new(InMemoryCache::new()),
            config,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn StudentModel>) -> Self {
        self.model = model;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn PlanStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_ephemeris(mut self, ephemeris: Arc<dyn EphemerisProvider>) -> Self {
        self.ephemeris = ephemeris;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ComposeCache<ComposeResponse>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_match_cache(mut self, cache: Arc<dyn ComposeCache<ControlSurfacePayload>>) -> Self {
        self.match_cache = cache;
        self
    }

    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    pub fn model_version(&self) -> &str {
        self.model.version()
    }

    pub fn compose(&self, request: &ComposeRequest, client_key: &str) -> Result<ComposeResponse, ComposeError> {
        self.compose_full(request, client_key).map(|c| c.response)
    }

    pub fn compose_full(&self, request: &ComposeRequest, client_key: &str) -> Result<Composition, ComposeError> {
        let started = Instant::now();
        let request = normalize(request);
        let mode = request.mode.unwrap_or(ComposeMode::Sandbox);
        let surface = self.resolve_surface(mode, &request)?;

        self.limiter
            .check(client_key, Instant::now())
            .map_err(|retry_after_secs| ComposeError::RateLimited { retry_after_secs })?;

        let key = idempotency_key(&request, self.model.version())?;
        let cached = if self.config.cache_enabled { self.cache.get(&key) } else { None };
        if let Some(response) = cached {
            info!(key = %key, control_hash = %response.controls.hash, "compose cache hit");
            return Ok(Composition {
                response,
                plan: None,
                cache_hit: true,
            });
        }

        let plan_seed = match &request.seed {
            Some(seed) => derive_seed(&surface.payload.hash, &seed.as_seed_string()),
            None => surface.payload.hash.clone(),
        };
        let outcome = self.run_cascade(&surface.payload, &plan_seed)?;
        let mut plan = outcome.plan.clone();
        let gate = audition(&mut plan, &surface.payload.hash, &self.config.audition);
        let mut report = gate.report;
        let force_fail = request.test_override.as_ref().is_some_and(|o| o.force_fail);
        if force_fail {
            report.force_fail();
        }
        debug!(
            structural_passed = gate.structural.passed,
            repairs = gate.structural.repairs.len(),
            calibrated = report.calibrated.overall,
            "audition complete"
        );

        let natal_flags = surface.natal.as_ref().map(|natal| self.natal_gate(natal));
        let text = realize(&ExplainInput {
            mode,
            payload: &surface.payload,
            weights: &surface.profile.element_weights,
            report: &report,
            natal: surface
                .natal
                .as_ref()
                .zip(natal_flags.as_ref())
                .map(|(payload, calibrated)| NatalContext { payload, calibrated }),
        });
        let explanation = explanation_doc(&text);

        let audio = self.mock_audio(&surface.payload.hash, &plan)?;
        let viz = match &self.config.artifacts.viz_base_url {
            Some(base) => Some(VizDescriptor {
                url: format!("{base}/{}.json", surface.payload.hash),
                digest: json_digest(&json!({ "controls": surface.payload, "scores": report.scores }))?,
            }),
            None => None,
        };
        let hashes = Hashes {
            control: json_digest(&surface.payload)?,
            audio: json_digest(&audio)?,
            explanation: json_digest(&explanation)?,
            viz: viz.as_ref().map(json_digest).transpose()?,
        };

        let artifacts = Artifacts {
            model: self.model.version().to_string(),
            encoder: self.config.artifacts.encoder.clone(),
            chart_hash: surface.chart_hash.clone(),
            features_version: self.config.artifacts.features_version.clone(),
            gate: self.config.artifacts.gate.clone(),
            mapping_tables_version: self.config.artifacts.mapping_tables_version.clone(),
            timestamp: self
                .config
                .artifacts
                .timestamp
                .clone()
                .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
            provenance: Provenance {
                source: outcome.provenance.clone(),
                model_version: outcome.diagnostics.model_version.clone(),
                chosen_index: outcome.diagnostics.chosen_index,
                candidate_scores: outcome.diagnostics.scores.iter().map(|c| round6(c.score)).collect(),
                quality: round6(outcome.quality),
                plan_id: plan.id.clone(),
            },
        };

        let response = ComposeResponse {
            astro: surface.profile.summary.clone(),
            gate_report: report_body(&report),
            text: TextBody {
                digest: json_digest(&text)?,
                blocks: text,
            },
            controls: surface.payload,
            audio,
            explanation,
            viz,
            hashes,
            artifacts,
        };

        if self.config.cache_enabled {
            self.cache.set(key, response.clone());
        }
        self.record(mode, &response, &report, started);

        Ok(Composition {
            response,
            plan: Some(plan),
            cache_hit: false,
        })
    }

    // ── Stages ──

    fn resolve_surface(&self, mode: ComposeMode, request: &ComposeRequest) -> Result<Surface, ComposeError> {
        match mode {
            ComposeMode::Sandbox => {
                let overrides = request.controls.clone().unwrap_or_default();
                let payload = apply_overrides(&sandbox_default(), &overrides);
                Ok(Surface {
                    profile: AstroProfile::from_payload(&payload),
                    chart_hash: payload.hash.clone(),
                    payload,
                    natal: None,
                })
            }
            ComposeMode::Sky => {
                let point = validate_point(
                    request.sky_params.as_ref(),
                    ["skyParams.latitude", "skyParams.longitude", "skyParams.datetime"],
                )
                .map_err(|details| ComposeError::validation("sky mode requires valid skyParams", details))?;
                let (profile, payload) = sky_payload(&point);
                Ok(Surface {
                    chart_hash: self.chart_hash(&point),
                    profile,
                    payload,
                    natal: None,
                })
            }
            ComposeMode::Overlay => {
                let params = request.overlay_params.clone().unwrap_or_default();
                let natal = validate_point(
                    Some(&params.natal()),
                    [
                        "overlayParams.natalLatitude",
                        "overlayParams.natalLongitude",
                        "overlayParams.natalDatetime",
                    ],
                );
                let current = validate_point(
                    Some(&params.current()),
                    [
                        "overlayParams.currentLatitude",
                        "overlayParams.currentLongitude",
                        "overlayParams.currentDatetime",
                    ],
                );
                let (natal, current) = match (natal, current) {
                    (Ok(natal), Ok(current)) => (natal, current),
                    (natal, current) => {
                        let details = natal.err().into_iter().chain(current.err()).flatten().collect();
                        return Err(ComposeError::validation(
                            "overlay mode requires valid natal and current params",
                            details,
                        ));
                    }
                };
                let (_, natal_payload) = sky_payload(&natal);
                let (profile, payload) = sky_payload(&current);
                Ok(Surface {
                    chart_hash: self.chart_hash(&current),
                    profile,
                    payload,
                    natal: Some(natal_payload),
                })
            }
            ComposeMode::Compatibility => self.compatibility_surface(request),
        }
    }

    fn compatibility_surface(&self, request: &ComposeRequest) -> Result<Surface, ComposeError> {
        let params = request.compatibility_params.clone().unwrap_or_default();
        let a = validate_point(
            params.chart_a.as_ref(),
            [
                "compatibilityParams.chartA.latitude",
                "compatibilityParams.chartA.longitude",
                "compatibilityParams.chartA.datetime",
            ],
        );
        let b = validate_point(
            params.chart_b.as_ref(),
            [
                "compatibilityParams.chartB.latitude",
                "compatibilityParams.chartB.longitude",
                "compatibilityParams.chartB.datetime",
            ],
        );
        let score = match params.compatibility_score {
            Some(s) if s.is_finite() && (0.0..=1.0).contains(&s) => Ok(s),
            Some(_) => Err(FieldError::new(
                "compatibilityParams.compatibilityScore",
                "must be between 0 and 1",
            )),
            None => Err(FieldError::new("compatibilityParams.compatibilityScore", "is required")),
        };
        let (a, b, score) = match (a, b, score) {
            (Ok(a), Ok(b), Ok(score)) => (a, b, score),
            (a, b, score) => {
                let mut details: Vec<FieldError> = a.err().into_iter().chain(b.err()).flatten().collect();
                details.extend(score.err());
                return Err(ComposeError::validation(
                    "compatibility mode requires two valid charts and a score",
                    details,
                ));
            }
        };

        let (profile_a, payload_a) = sky_payload(&a);
        let (profile_b, payload_b) = sky_payload(&b);
        let key = match_key(&payload_a.hash, &payload_b.hash, score);
        let payload = match self.match_cache.get(&key) {
            Some(hit) => {
                debug!(key = %key, "match cache hit");
                hit
            }
            None => {
                let blended = blend_compatibility(&payload_a, &payload_b, score);
                self.match_cache.set(key, blended.clone());
                blended
            }
        };
        let mut profile = AstroProfile::from_payload(&payload);
        profile.element_weights = ElementWeights::average(&profile_a.element_weights, &profile_b.element_weights);
        let pair = format!("{}|{}", self.chart_hash(&a), self.chart_hash(&b));
        let chart_hash = sha256_hex(pair.as_bytes())[..16].to_string();
        Ok(Surface {
            payload,
            profile,
            chart_hash,
            natal: None,
        })
    }

    fn chart_hash(&self, point: &SkyPoint) -> String {
        feature_digest(&encode_features(&self.ephemeris.snapshot(point)))
    }

    fn run_cascade(&self, payload: &ControlSurfacePayload, seed: &str) -> Result<CascadeOutcome, ComposeError> {
        let vector = self.model.infer(&control_features(payload));
        let context = ChartContext {
            hash: seed.to_string(),
            guidance: Some(guidance_for(payload)),
        };
        Ok(generate_plan(
            &vector,
            Some(&context),
            self.strategy.as_ref(),
            &self.config.cascade,
            self.model.version(),
        )?)
    }

    /// Calibrated flags for the natal side of an overlay. A natal plan that
    /// exhausts quality counts as failing every gate.
    fn natal_gate(&self, natal: &ControlSurfacePayload) -> GateFlags {
        match self.run_cascade(natal, &natal.hash) {
            Ok(outcome) => {
                let mut plan = outcome.plan;
                audition(&mut plan, &natal.hash, &self.config.audition).report.calibrated
            }
            Err(err) => {
                debug!(error = %err, "natal plan rejected");
                GateFlags::all_failed()
            }
        }
    }

    fn mock_audio(&self, hash: &str, plan: &Plan) -> Result<AudioDescriptor, ComposeError> {
        let mut rng = SeededRng::from_seed_str(&derive_seed(hash, "audio"));
        let latency_ms = rng.range_u32(180, 901);
        let url = format!("{}/{hash}.ogg", self.config.artifacts.audio_base_url.trim_end_matches('/'));
        let fingerprint = sha256_hex(canonical_json(&plan.events)?.as_bytes());
        let digest = json_digest(&json!({ "url": url, "latency_ms": latency_ms, "plan": fingerprint }))?;
        Ok(AudioDescriptor {
            url,
            digest,
            latency_ms,
        })
    }

    // ── Observability ──

    fn record(&self, mode: ComposeMode, response: &ComposeResponse, report: &GateReport, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            mode = mode.as_str(),
            control_hash = %response.controls.hash,
            template_id = %response.text.blocks.template_id,
            calibrated = report.calibrated.overall,
            strict = report.strict.overall,
            rule_quality = report.rule_quality_passed,
            quality = response.artifacts.provenance.quality,
            elapsed_ms,
            "compose complete"
        );
        let Some(dir) = &self.config.log_dir else {
            return;
        };
        let record = json!({
            "event": "compose",
            "mode": mode.as_str(),
            "control_hash": response.controls.hash,
            "template_id": response.text.blocks.template_id,
            "scores": report.scores,
            "calibrated": response.gate_report.calibrated,
            "strict": response.gate_report.strict,
            "rule_quality": {
                "passed": report.rule_quality_passed,
                "failing": report.rule_quality_failing,
            },
            "latency_ms": {
                "gate": report.latency_ms,
                "audio": response.audio.latency_ms,
                "pipeline": round6(elapsed_ms),
            },
        });
        if let Err(err) = append_log(dir, &record) {
            warn!(error = %err, dir = %dir.display(), "cannot write compose log");
        }
    }
}

fn append_log(dir: &Path, record: &serde_json::Value) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(COMPOSE_LOG_FILE))?;
    writeln!(file, "{record}")
}

// ── Helpers ──

/// Fill defaults: missing mode is sandbox, and sandbox always carries a
/// controls object.
pub fn normalize(request: &ComposeRequest) -> ComposeRequest {
    let mut request = request.clone();
    let mode = request.mode.unwrap_or(ComposeMode::Sandbox);
    request.mode = Some(mode);
    if mode == ComposeMode::Sandbox && request.controls.is_none() {
        request.controls = Some(ControlOverrides::default());
    }
    request
}

/// `sha256(canonical(request) + model_version)`.
pub fn idempotency_key(request: &ComposeRequest, model_version: &str) -> Result<String, ComposeError> {
    let body = canonical_json(request)?;
    Ok(sha256_hex(format!("{body}{model_version}").as_bytes()))
}

/// Parse a request body. Malformed JSON is a validation failure.
pub fn parse_request(body: &str) -> Result<ComposeRequest, ComposeError> {
    serde_json::from_str(body).map_err(|err| {
        ComposeError::validation("malformed compose request", vec![FieldError::new("body", err.to_string())])
    })
}

/// Planner guidance from the chart-level fields of a payload.
pub fn guidance_for(payload: &ControlSurfacePayload) -> Guidance {
    let mode = match payload.element_dominance {
        Element::Fire => Mode::Ionian,
        Element::Earth => Mode::Dorian,
        Element::Air => Mode::Mixolydian,
        Element::Water => Mode::Aeolian,
    };
    Guidance {
        mode,
        tension: payload.aspect_tension,
        rhythm_template: payload.rhythm_template_id,
        leap_cap: payload.leap_cap,
    }
}

fn flags_body(flags: &GateFlags) -> GateFlagsBody {
    GateFlagsBody {
        melody_arc: flags.melody_arc,
        melody_step_leap: flags.melody_step_leap,
        melody_narrative: flags.melody_narrative,
        rhythm_diversity: flags.rhythm_diversity,
        overall: flags.overall,
    }
}

pub fn report_body(report: &GateReport) -> GateReportBody {
    GateReportBody {
        calibrated: flags_body(&report.calibrated),
        strict: flags_body(&report.strict),
        rule_quality_passed: report.rule_quality_passed,
        rule_quality_failing: report.rule_quality_failing.clone(),
        scores: report.scores.clone(),
        latency_ms: report.latency_ms.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_chorus_protocol::{RequestSeed, TestOverride};

    fn fixed_config() -> ComposeConfig {
        let mut config = ComposeConfig::default();
        config.artifacts.timestamp = Some("2025-01-01T00:00:00Z".into());
        config
    }

    #[test]
    fn normalize_defaults_to_sandbox_with_controls() {
        let normalized = normalize(&ComposeRequest::default());
        assert_eq!(normalized.mode, Some(ComposeMode::Sandbox));
        assert_eq!(normalized.controls, Some(ControlOverrides::default()));
    }

    #[test]
    fn missing_mode_and_explicit_sandbox_share_a_key() {
        let implicit = normalize(&ComposeRequest::default());
        let explicit = normalize(&ComposeRequest {
            mode: Some(ComposeMode::Sandbox),
            controls: Some(ControlOverrides::default()),
            ..Default::default()
        });
        assert_eq!(
            idempotency_key(&implicit, "m1").unwrap(),
            idempotency_key(&explicit, "m1").unwrap()
        );
        assert_ne!(
            idempotency_key(&implicit, "m1").unwrap(),
            idempotency_key(&implicit, "m2").unwrap()
        );
    }

    #[test]
    fn guidance_follows_element() {
        let mut payload = sandbox_default();
        assert_eq!(guidance_for(&payload).mode, Mode::Mixolydian);
        payload.element_dominance = Element::Water;
        let g = guidance_for(&payload);
        assert_eq!(g.mode, Mode::Aeolian);
        assert_eq!(g.leap_cap, 5);
        assert_eq!(g.rhythm_template, 3);
    }

    #[test]
    fn malformed_body_is_a_validation_error() {
        let err = parse_request(r#"{"mode": "lunar"}"#).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(parse_request(r#"{"mode": "sky"}"#).is_ok());
    }

    #[test]
    fn request_seed_changes_the_plan_not_the_controls() {
        let composer = Composer::new(fixed_config());
        let plain = composer.compose_full(&ComposeRequest::default(), "t").unwrap();
        let seeded = composer
            .compose_full(
                &ComposeRequest {
                    seed: Some(RequestSeed::Number(7)),
                    ..Default::default()
                },
                "t",
            )
            .unwrap();
        assert_eq!(plain.response.hashes.control, seeded.response.hashes.control);
        assert_ne!(
            plain.response.artifacts.provenance.plan_id,
            seeded.response.artifacts.provenance.plan_id
        );
    }

    #[test]
    fn compose_log_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixed_config();
        config.log_dir = Some(dir.path().join("logs"));
        let composer = Composer::new(config);
        composer.compose(&ComposeRequest::default(), "t").unwrap();
        let forced = ComposeRequest {
            test_override: Some(TestOverride { force_fail: true }),
            ..Default::default()
        };
        composer.compose(&forced, "t").unwrap();
        let log = std::fs::read_to_string(dir.path().join("logs").join(COMPOSE_LOG_FILE)).unwrap();
        let lines: Vec<serde_json::Value> = log.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["calibrated"]["overall"], false);
        assert!(lines[0]["latency_ms"]["gate"]["total"].is_number());
    }

    #[test]
    fn unwritable_log_dir_only_warns() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let mut config = fixed_config();
        config.log_dir = Some(blocker.join("logs"));
        let composer = Composer::new(config);
        assert!(composer.compose(&ComposeRequest::default(), "t").is_ok());
    }
}

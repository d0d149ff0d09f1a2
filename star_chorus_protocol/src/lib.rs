// star_chorus_protocol: wire types for the compose API.
//
// This crate defines the request, response and error shapes exchanged between
// clients and the compose pipeline (`star_chorus_compose`). It has no
// dependency on the music or compose crates so that a front-end or test
// harness can depend on the wire contract alone.
//
// Module overview:
// - `types.rs`:    Control surface payload, partial overrides, element and
//                  modality enums, compose mode, astro summary.
// - `message.rs`:  `ComposeRequest` (camelCase, all parts optional) and the
//                  `ComposeResponse` envelope with its supporting structs.
// - `error.rs`:    `ErrorBody`, field-level validation details, error codes.
//
// Design decisions:
// - **JSON serialization.** Field names are part of the public contract, so
//   every rename is explicit in the derive attributes.
// - **Gate report mirrored as plain data.** The music crate's report type is
//   converted at the pipeline boundary instead of being shared.

pub mod error;
pub mod message;
pub mod types;

pub use error::{COMPOSE_ERROR, ErrorBody, FieldError, QUALITY_EXHAUSTED, RATE_LIMITED, VALIDATION_ERROR};
pub use message::{
    Artifacts, AudioDescriptor, CompatibilityParams, ComposeRequest, ComposeResponse, EXPLANATION_SPEC,
    Explanation, ExplanationSection, GateFlagsBody, GateReportBody, Hashes, OverlayParams, Provenance,
    RequestSeed, SkyParams, TestOverride, TextBody, TextExplainer, VizDescriptor,
};
pub use types::{AstroSummary, ComposeMode, ControlOverrides, ControlSurfacePayload, Element, Modality};

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn request_roundtrip(req: &ComposeRequest) {
        let json = serde_json::to_vec(req).unwrap();
        let recovered: ComposeRequest = serde_json::from_slice(&json).unwrap();
        assert_eq!(&recovered, req);
    }

    fn sample_payload() -> ControlSurfacePayload {
        ControlSurfacePayload {
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
            hash: "0123456789abcdef".into(),
        }
    }

    fn flags(ok: bool) -> GateFlagsBody {
        GateFlagsBody {
            melody_arc: ok,
            melody_step_leap: ok,
            melody_narrative: ok,
            rhythm_diversity: ok,
            overall: ok,
        }
    }

    fn sample_response() -> ComposeResponse {
        ComposeResponse {
            controls: sample_payload(),
            astro: AstroSummary {
                element_dominance: Element::Air,
                aspect_tension: 0.4,
                modality: Modality::Mutable,
            },
            gate_report: GateReportBody {
                calibrated: flags(true),
                strict: flags(false),
                rule_quality_passed: false,
                rule_quality_failing: vec!["rhythm_groove".into()],
                scores: BTreeMap::from([("melody_arc".to_string(), 0.7)]),
                latency_ms: BTreeMap::from([("total".to_string(), 12.5)]),
            },
            audio: AudioDescriptor {
                url: "https://audio.example/a.wav".into(),
                digest: "sha256:aa".into(),
                latency_ms: 420,
            },
            text: TextBody {
                blocks: TextExplainer {
                    short: "A rising line.".into(),
                    long: "A rising line over a steady pulse.".into(),
                    bullets: vec!["Arc: rise-peak-release".into()],
                    template_id: "arc.high.0".into(),
                    seed: "0123456789abcdef".into(),
                },
                digest: "sha256:bb".into(),
            },
            explanation: Explanation {
                spec: EXPLANATION_SPEC.into(),
                sections: vec![ExplanationSection {
                    title: "Theme".into(),
                    text: "A rising line.".into(),
                }],
            },
            viz: None,
            hashes: Hashes {
                control: "sha256:cc".into(),
                audio: "sha256:aa".into(),
                explanation: "sha256:dd".into(),
                viz: None,
            },
            artifacts: Artifacts {
                model: "student-linear".into(),
                encoder: "features-v1".into(),
                chart_hash: "0123456789abcdef".into(),
                features_version: "1".into(),
                gate: "audition-v1".into(),
                mapping_tables_version: "1".into(),
                timestamp: "2025-01-01T12:00:00+00:00".into(),
                provenance: Provenance {
                    source: "student+rerank".into(),
                    model_version: "v1".into(),
                    chosen_index: 0,
                    candidate_scores: vec![0.8, 0.7],
                    quality: 0.8,
                    plan_id: "0123456789abcdef-c0".into(),
                },
            },
        }
    }

    #[test]
    fn roundtrip_sandbox_request() {
        request_roundtrip(&ComposeRequest {
            mode: Some(ComposeMode::Sandbox),
            controls: Some(ControlOverrides {
                step_bias: Some(0.9),
                element_dominance: Some(Element::Fire),
                ..ControlOverrides::default()
            }),
            seed: Some(RequestSeed::Number(7)),
            ..ComposeRequest::default()
        });
    }

    #[test]
    fn roundtrip_overlay_request() {
        request_roundtrip(&ComposeRequest {
            mode: Some(ComposeMode::Overlay),
            overlay_params: Some(OverlayParams {
                natal_latitude: Some(51.5),
                natal_longitude: Some(-0.12),
                natal_datetime: Some("1990-06-01T08:00:00Z".into()),
                current_latitude: Some(40.7128),
                current_longitude: Some(-74.006),
                current_datetime: Some("2025-01-01T12:00:00Z".into()),
            }),
            test_override: Some(TestOverride { force_fail: true }),
            ..ComposeRequest::default()
        });
    }

    #[test]
    fn request_uses_camel_case() {
        let json = r#"{
            "mode": "sky",
            "skyParams": {"latitude": 40.7128, "longitude": -74.006, "datetime": "2025-01-01T12:00:00Z"},
            "testOverride": {"forceFail": true},
            "seed": "abc"
        }"#;
        let req: ComposeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.mode, Some(ComposeMode::Sky));
        assert_eq!(req.sky_params, Some(SkyParams::new(40.7128, -74.006, "2025-01-01T12:00:00Z")));
        assert!(req.test_override.unwrap().force_fail);
        assert_eq!(req.seed.unwrap().as_seed_string(), "abc");
    }

    #[test]
    fn compatibility_params_use_chart_names() {
        let json = r#"{"mode":"compatibility","compatibilityParams":{
            "chartA":{"latitude":1.0,"longitude":2.0,"datetime":"2025-01-01T00:00:00Z"},
            "chartB":{"latitude":3.0,"longitude":4.0,"datetime":"2025-01-02T00:00:00Z"},
            "compatibilityScore":0.8}}"#;
        let req: ComposeRequest = serde_json::from_str(json).unwrap();
        let params = req.compatibility_params.unwrap();
        assert_eq!(params.chart_a.unwrap().latitude, Some(1.0));
        assert_eq!(params.compatibility_score, Some(0.8));
    }

    #[test]
    fn empty_request_parses() {
        let req: ComposeRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, ComposeRequest::default());
        assert!(req.controls.is_none());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(serde_json::from_str::<ComposeRequest>(r#"{"mode":"astral"}"#).is_err());
    }

    #[test]
    fn overlay_splits_into_sky_params() {
        let overlay = OverlayParams {
            natal_latitude: Some(1.0),
            current_datetime: Some("2025-01-01T00:00:00Z".into()),
            ..OverlayParams::default()
        };
        assert_eq!(overlay.natal().latitude, Some(1.0));
        assert_eq!(overlay.natal().datetime, None);
        assert_eq!(overlay.current().datetime.as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn response_has_wire_field_names() {
        let value = serde_json::to_value(sample_response()).unwrap();
        for key in ["controls", "astro", "gate_report", "audio", "text", "explanation", "viz", "hashes", "artifacts"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value["viz"].is_null());
        assert_eq!(value["explanation"]["spec"], "UnifiedSpecV1.1");
        assert!(value["artifacts"].get("chartHash").is_some());
        assert!(value["artifacts"].get("featuresVersion").is_some());
        assert!(value["artifacts"].get("mapping_tables_version").is_some());
        assert_eq!(value["controls"]["element_dominance"], "air");
        assert_eq!(value["audio"]["latency_ms"], 420);
    }

    #[test]
    fn roundtrip_response() {
        let response = sample_response();
        let json = serde_json::to_string(&response).unwrap();
        let recovered: ComposeResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(recovered, response);
    }

    #[test]
    fn error_body_omits_empty_hints() {
        let body = ErrorBody {
            error: "Compose API error: boom".into(),
            code: error::COMPOSE_ERROR.into(),
            status: 500,
            details: None,
            retry_after_secs: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("details").is_none());
        assert!(value.get("retry_after_secs").is_none());
        assert_eq!(value["code"], "VNEXT_COMPOSE_ERROR");
    }

    #[test]
    fn overrides_ignore_supplied_hash() {
        let overrides: ControlOverrides = serde_json::from_str(r#"{"leap_cap": 3, "hash": "stale"}"#).unwrap();
        assert_eq!(overrides.leap_cap, Some(3.0));
        assert!(!overrides.is_empty());
        assert!(ControlOverrides::default().is_empty());
    }
}

// Star Chorus compose pipeline.
//
// Turns a compose request (sky, overlay, sandbox or compatibility) into a
// hashed, explained response: control surface, gate report, mock audio,
// text and explanation, with independent digests for each artifact.
//
// Module overview:
// - hashing.rs:      Canonical JSON, SHA-256 digests, float rounding.
// - ephemeris.rs:    Snapshot types, the `EphemerisProvider` seam and a
//                    deterministic mock provider.
// - features.rs:     64-dim ephemeris features and 16-dim control features.
// - controls.rs:     Control surface per mode, overrides, validation, hash.
// - model.rs:        `StudentModel` seam, linear model, pinned artifact
//                    loading with one-step rollback.
// - cache.rs:        `ComposeCache` trait and the in-memory cache.
// - rate_limit.rs:   Per-client fixed-window limiter.
// - config.rs:       `ComposeConfig`, loaded from JSON.
// - error.rs:        `ComposeError` and its wire form.
// - explainer/:      Atoms, realizer (fail-closed), overlay contrast.
// - orchestrator.rs: `Composer`, the request pipeline.
//
// Plans, critics, the Audition Gate and the cascade live in
// `star_chorus_music`; wire types live in `star_chorus_protocol`.

pub mod cache;
pub mod config;
pub mod controls;
pub mod ephemeris;
pub mod error;
pub mod explainer;
pub mod features;
pub mod hashing;
pub mod model;
pub mod orchestrator;
pub mod rate_limit;

pub use config::ComposeConfig;
pub use error::ComposeError;
pub use orchestrator::{Composer, Composition};

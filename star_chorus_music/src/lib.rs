// Star Chorus music core.
//
// Turns a 6-D control vector into a scored, validated musical plan. The
// compose pipeline in `star_chorus_compose` drives it; the `audition` binary
// runs it standalone.
//
// Architecture:
// - plan.rs: Core plan representation (timed events on four channels)
// - mode.rs: Church mode definitions and degree-to-pitch mapping
// - planner.rs: The pluggable `PlanStrategy` trait and the reference
//   phrase planner (contour-driven melody, per-bar triads, bass, percussion)
// - critics.rs: Melody, harmony and rhythm critics with per-metric thresholds
// - cascade.rs: Seeded jitter of the control vector, parallel scoring,
//   rerank and the quality floor
// - audition.rs: Structural validation with timewarp and overlap repair, and
//   the calibrated/strict gate report
// - midi.rs: MIDI file output from plans
//
// Every stage is deterministic given its inputs; randomness comes only from
// `star_chorus_prng` generators keyed by strings the caller derives.

pub mod audition;
pub mod cascade;
pub mod critics;
pub mod midi;
pub mod mode;
pub mod plan;
pub mod planner;

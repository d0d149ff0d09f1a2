// Star Chorus plan audition: CLI entry point.
//
// Runs one control vector through the cascade and the Audition Gate, prints
// the candidate scores and gate flags, and writes the chosen plan to MIDI.
// Useful for listening to what the planner does with a given vector without
// going through the full compose pipeline.
//
// Usage:
//   cargo run -p star_chorus_music --bin audition -- [output.mid]
//     [--vector a,b,c,d,e,f] [--mode MODE] [--tension X] [--template N]
//     [--leap-cap N] [--k N] [--sigma X] [--seed STR]
//
// Modes: dorian, phrygian, lydian, mixolydian, aeolian, ionian

use star_chorus_music::audition::{AuditionConfig, audition};
use star_chorus_music::cascade::{CascadeConfig, ChartContext, PlanError, generate_plan};
use star_chorus_music::midi::write_midi;
use star_chorus_music::mode::Mode;
use star_chorus_music::planner::{ControlVector, Guidance, PLAN_DIMS, PhrasePlanner};
use std::path::Path;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let output_path = args
        .get(1)
        .filter(|s| !s.starts_with("--"))
        .map(|s| s.as_str())
        .unwrap_or("audition.mid");
    let vector = parse_flag::<String>(&args, "--vector")
        .map(|s| parse_vector(&s))
        .unwrap_or([0.6, 0.5, 0.5, 0.6, 0.3, 0.5]);
    let mode_name: String = parse_flag(&args, "--mode").unwrap_or_else(|| "ionian".to_string());
    let mode = Mode::from_name(&mode_name).unwrap_or_else(|| {
        eprintln!("Unknown mode '{}'. Using Ionian.", mode_name);
        Mode::Ionian
    });
    let defaults = Guidance::default();
    let guidance = Guidance {
        mode,
        tension: parse_flag(&args, "--tension").unwrap_or(defaults.tension),
        rhythm_template: parse_flag(&args, "--template").unwrap_or(defaults.rhythm_template),
        leap_cap: parse_flag(&args, "--leap-cap").unwrap_or(defaults.leap_cap),
    };
    let cascade_defaults = CascadeConfig::default();
    let config = CascadeConfig {
        k: parse_flag(&args, "--k").unwrap_or(cascade_defaults.k),
        sigma: parse_flag(&args, "--sigma").unwrap_or(cascade_defaults.sigma),
        ..cascade_defaults
    };
    let seed: String = parse_flag(&args, "--seed").unwrap_or_else(|| "seed".to_string());

    println!("=== Star Chorus Plan Audition ===");
    println!("Output: {}", output_path);
    println!("Vector: {:?}", vector);
    println!("Guidance: {:?}", guidance);
    println!("Candidates: {} (sigma {})", config.k, config.sigma);
    println!();

    let context = ChartContext {
        hash: seed.clone(),
        guidance: Some(guidance),
    };
    let planner = PhrasePlanner::default();

    println!("[1/3] Running cascade...");
    let outcome = match generate_plan(&vector, Some(&context), &planner, &config, "cli") {
        Ok(outcome) => outcome,
        Err(PlanError::BelowThreshold { floor, diagnostics }) => {
            eprintln!("All candidates below quality floor {:.2}:", floor);
            for d in &diagnostics {
                eprintln!("  #{} score {:.4}", d.index, d.score);
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Cascade failed: {}", e);
            std::process::exit(1);
        }
    };
    for d in &outcome.diagnostics.scores {
        let marker = if d.index == outcome.diagnostics.chosen_index { "*" } else { " " };
        println!("  {}#{} score {:.4}", marker, d.index, d.score);
    }

    println!("[2/3] Auditioning...");
    let mut plan = outcome.plan;
    let result = audition(&mut plan, &seed, &AuditionConfig::default());
    println!("  Structure: {}", if result.structural.passed { "ok" } else { "FAILED" });
    for issue in &result.structural.issues {
        println!("    issue: {:?}", issue);
    }
    for repair in &result.structural.repairs {
        println!("    repair: {:?}", repair);
    }
    println!("  Calibrated: {:?}", result.report.calibrated);
    println!("  Strict:     {:?}", result.report.strict);
    println!(
        "  Rules:      {} {:?}",
        if result.report.rule_quality_passed { "pass" } else { "fail" },
        result.report.rule_quality_failing
    );
    println!("  Aggregate:  {:.4}", result.quality.aggregate);
    println!();
    print!("{}", plan.summary());

    println!("[3/3] Writing MIDI...");
    match write_midi(&plan, Path::new(output_path)) {
        Ok(()) => println!("  Written to {}", output_path),
        Err(e) => {
            eprintln!("  Failed to write MIDI: {}", e);
            std::process::exit(1);
        }
    }
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

/// Parse "a,b,c,d,e,f"; missing or malformed entries become 0.5.
fn parse_vector(s: &str) -> ControlVector {
    let mut vector = [0.5; PLAN_DIMS];
    for (slot, part) in vector.iter_mut().zip(s.split(',')) {
        *slot = part.trim().parse().unwrap_or(0.5);
    }
    vector
}

// `compose`: run one compose request from the command line.
//
// Reads a request JSON from a file or stdin, composes it with the default
// in-process collaborators (or a pinned model artifact), and prints the
// response JSON to stdout. On failure the error body is printed instead and
// the process exits with status 1. Logs go to stderr, filtered by RUST_LOG.
//
// Usage:
//   compose --request req.json [--config config.json] [--midi out.mid]
//           [--model m.json --model-sha256 HEX [--fallback-model f.json
//           --fallback-sha256 HEX]] [--client KEY]

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use star_chorus_compose::config::ComposeConfig;
use star_chorus_compose::model::{ModelLoader, ModelSource};
use star_chorus_compose::orchestrator::{Composer, parse_request};
use star_chorus_music::midi::write_midi;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(about = "Compose one Star Chorus request")]
struct CliArgs {
    /// Request JSON file. Reads stdin when omitted.
    #[clap(long)]
    request: Option<PathBuf>,

    /// Compose config JSON. Defaults apply when omitted.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Write the chosen plan as a MIDI file.
    #[clap(long)]
    midi: Option<PathBuf>,

    /// Student model artifact.
    #[clap(long, requires = "model_sha256")]
    model: Option<PathBuf>,

    /// Expected SHA-256 of the model artifact.
    #[clap(long)]
    model_sha256: Option<String>,

    /// Fallback model artifact used when the primary fails its integrity check.
    #[clap(long, requires_all = ["model", "fallback_sha256"])]
    fallback_model: Option<PathBuf>,

    #[clap(long)]
    fallback_sha256: Option<String>,

    /// Rate-limit key for this caller.
    #[clap(long, default_value = "cli")]
    client: String,

    /// Pretty-print the response.
    #[clap(long)]
    pretty: bool,
}

fn main() {
    let cli_args = CliArgs::parse();

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();

    if let Err(err) = run(&cli_args) {
        error!("{err:#}");
        std::process::exit(1);
    }
}

fn run(cli_args: &CliArgs) -> Result<()> {
    let config = match &cli_args.config {
        Some(path) => ComposeConfig::load(path)?,
        None => ComposeConfig::default(),
    };
    let mut composer = Composer::new(config);

    if let (Some(path), Some(sha256)) = (&cli_args.model, &cli_args.model_sha256) {
        let mut loader = ModelLoader::new(ModelSource {
            path: path.clone(),
            sha256: sha256.clone(),
        });
        if let (Some(path), Some(sha256)) = (&cli_args.fallback_model, &cli_args.fallback_sha256) {
            loader = loader.with_fallback(ModelSource {
                path: path.clone(),
                sha256: sha256.clone(),
            });
        }
        let loaded = loader.load()?;
        if loaded.rolled_back {
            info!(version = %loaded.model.version, "serving fallback model");
        }
        composer = composer.with_model(Arc::new(loaded.model));
    }

    let body = match &cli_args.request {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut body = String::new();
            std::io::stdin().read_to_string(&mut body).context("reading stdin")?;
            body
        }
    };

    let composition = parse_request(&body).and_then(|request| composer.compose_full(&request, &cli_args.client));
    let composition = match composition {
        Ok(composition) => composition,
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.to_error_body())?);
            anyhow::bail!(err);
        }
    };

    let response = &composition.response;
    let json = if cli_args.pretty {
        serde_json::to_string_pretty(response)?
    } else {
        serde_json::to_string(response)?
    };
    println!("{json}");
    eprintln!(
        "{} | quality {:.3} | calibrated {} | strict {} | {}",
        response.controls.hash,
        response.artifacts.provenance.quality,
        response.gate_report.calibrated.overall,
        response.gate_report.strict.overall,
        response.hashes.control
    );

    if let Some(path) = &cli_args.midi {
        match &composition.plan {
            Some(plan) => {
                write_midi(plan, path).map_err(|e| anyhow::anyhow!("writing MIDI {}: {e}", path.display()))?;
                info!(path = %path.display(), events = plan.events.len(), "wrote MIDI");
            }
            None => info!("cached response has no plan; MIDI not written"),
        }
    }
    Ok(())
}

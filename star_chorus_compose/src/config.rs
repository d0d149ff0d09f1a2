// Data-driven compose configuration.
//
// Every tunable the pipeline reads lives in `ComposeConfig`: the cascade
// (candidate count, jitter, quality floor), the Audition Gate thresholds,
// rate limiting, artifact version tags and URLs, cache and log switches.
// Pipeline code never hard-codes these; it reads them from here. Each
// sub-struct is `#[serde(default)]` so a config file only needs the fields it
// changes.
//
// See also: `star_chorus_music::cascade::CascadeConfig` and
// `star_chorus_music::audition::AuditionConfig`, which are embedded as-is.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use star_chorus_music::audition::AuditionConfig;
use star_chorus_music::cascade::CascadeConfig;
use thiserror::Error;

use crate::features::FEATURES_VERSION;
use crate::rate_limit::RateLimitConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Version tags and URL bases reported in response artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub encoder: String,
    pub features_version: String,
    pub gate: String,
    pub mapping_tables_version: String,
    pub audio_base_url: String,
    /// No viz descriptor is produced when unset.
    pub viz_base_url: Option<String>,
    /// Fixed artifact timestamp. When unset the wall clock is used; the
    /// timestamp feeds no digest.
    pub timestamp: Option<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        ArtifactConfig {
            encoder: "control-encoder-v1".into(),
            features_version: FEATURES_VERSION.into(),
            gate: "audition-gate-v1".into(),
            mapping_tables_version: "atoms-v1.1".into(),
            audio_base_url: "https://cdn.starchorus.local/audio".into(),
            viz_base_url: None,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    pub cascade: CascadeConfig,
    pub audition: AuditionConfig,
    pub rate_limit: RateLimitConfig,
    pub artifacts: ArtifactConfig,
    /// Idempotency cache switch.
    pub cache_enabled: bool,
    /// Directory for the JSONL compose log. No file log when unset.
    pub log_dir: Option<PathBuf>,
    /// Target composition length in seconds.
    pub duration_sec: f64,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        ComposeConfig {
            cascade: CascadeConfig::default(),
            audition: AuditionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            artifacts: ArtifactConfig::default(),
            cache_enabled: true,
            log_dir: None,
            duration_sec: 60.0,
        }
    }
}

impl ComposeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = ComposeConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored = ComposeConfig::from_json_str(&json).unwrap();
        assert_eq!(config, restored);
        assert_eq!(restored.cascade.k, 5);
        assert_eq!(restored.audition.calibrated.melody_step_leap, 0.40);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = ComposeConfig::from_json_str(
            r#"{
                "cascade": { "k": 3, "min_quality": 0.5 },
                "cache_enabled": false,
                "artifacts": { "viz_base_url": "https://viz.example" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.cascade.k, 3);
        assert_eq!(config.cascade.sigma, 0.10);
        assert!(!config.cache_enabled);
        assert_eq!(config.artifacts.viz_base_url.as_deref(), Some("https://viz.example"));
        assert_eq!(config.artifacts.features_version, FEATURES_VERSION);
        assert_eq!(config.rate_limit.max_requests, 60);
        assert_eq!(config.duration_sec, 60.0);
    }

    #[test]
    fn load_reports_missing_file_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(ComposeConfig::load(&missing), Err(ConfigError::Io { .. })));
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(ComposeConfig::load(&bad), Err(ConfigError::Parse(_))));
    }
}

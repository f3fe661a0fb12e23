//! Configuration, persisted as TOML.
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration.

use std::path::Path;
use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::matcher::{EmbeddingMatcher, MatcherMode, ObjectMatcher};
use crate::ingest::FixedDepthCamera;
use crate::oracle::ollama::OllamaConfig;
use crate::query::RetrievalStrategy;
use crate::temporal::Timestamp;

/// Errors from configuration handling.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(egg::config::read),
        help("Ensure the config file exists, or omit --config to use the defaults.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}: {message}")]
    #[diagnostic(
        code(egg::config::parse),
        help("Check the TOML syntax. Sections are [oracle], [retrieval], [matcher] and [camera].")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(egg::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config value {field}: {message}")]
    #[diagnostic(code(egg::config::invalid), help("Fix the value in the config file."))]
    Invalid { field: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EggConfig {
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub camera: FixedDepthCamera,
}

/// `[oracle]`: the Ollama server answering queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u64,
    /// Extra attempts for transient failures.
    #[serde(default)]
    pub transient_retries: u32,
}

fn default_base_url() -> String {
    OllamaConfig::default().base_url
}
fn default_model() -> String {
    OllamaConfig::default().model
}
fn default_timeout_secs() -> u64 {
    OllamaConfig::default().timeout_secs
}
fn default_num_ctx() -> u64 {
    OllamaConfig::default().num_ctx
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            temperature: 0.0,
            num_ctx: default_num_ctx(),
            transient_retries: 0,
        }
    }
}

/// `[retrieval]`: how queries are answered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub strategy: RetrievalStrategy,
    /// Fixed "now" quoted to the oracle (`YYYY-MM-DD HH:MM:SS`). Defaults to
    /// the wall clock, which makes runs over recorded data non-reproducible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<String>,
}

/// `[matcher]`: how ingestion decides two observations are the same object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(default)]
    pub mode: MatcherMode,
    #[serde(default = "default_embedding_threshold")]
    pub embedding_threshold: f32,
}

fn default_embedding_threshold() -> f32 {
    EmbeddingMatcher::DEFAULT_THRESHOLD
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            mode: MatcherMode::default(),
            embedding_threshold: default_embedding_threshold(),
        }
    }
}

impl EggConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Reject values that would only fail later, mid-run.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.oracle.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "oracle.timeout_secs".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(-1.0..=1.0).contains(&self.matcher.embedding_threshold) {
            return Err(ConfigError::Invalid {
                field: "matcher.embedding_threshold".into(),
                message: format!("{} is not a cosine similarity", self.matcher.embedding_threshold),
            });
        }
        self.camera.validate().map_err(|e| ConfigError::Invalid {
            field: "camera".into(),
            message: e.to_string(),
        })?;
        self.current_time()?;
        Ok(())
    }

    /// Settings for the Ollama client.
    pub fn ollama(&self) -> OllamaConfig {
        OllamaConfig {
            base_url: self.oracle.base_url.clone(),
            model: self.oracle.model.clone(),
            timeout_secs: self.oracle.timeout_secs,
            temperature: self.oracle.temperature,
            num_ctx: self.oracle.num_ctx,
        }
    }

    pub fn matcher(&self) -> Arc<dyn ObjectMatcher> {
        self.matcher.mode.build(self.matcher.embedding_threshold)
    }

    /// The configured current time, normalized, if any.
    pub fn current_time(&self) -> ConfigResult<Option<String>> {
        self.retrieval
            .current_time
            .as_deref()
            .map(|value| {
                Timestamp::parse_local(value)
                    .map(Timestamp::to_local_string)
                    .map_err(|e| ConfigError::Invalid {
                        field: "retrieval.current_time".into(),
                        message: e.to_string(),
                    })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: EggConfig = toml::from_str("").unwrap();
        assert_eq!(config, EggConfig::default());
        assert_eq!(config.oracle.base_url, "http://localhost:11434");
        assert_eq!(config.retrieval.strategy, RetrievalStrategy::PruningUnified);
        assert_eq!(config.matcher.mode, MatcherMode::GroundTruth);
        assert_eq!(config.camera, FixedDepthCamera::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: EggConfig = toml::from_str(
            r#"
            [oracle]
            model = "qwen2.5:14b"
            transient_retries = 2

            [retrieval]
            strategy = "no_edge"
            current_time = "2025-08-30 23:59:00"

            [matcher]
            mode = "embedding"
            "#,
        )
        .unwrap();
        assert_eq!(config.oracle.model, "qwen2.5:14b");
        assert_eq!(config.oracle.timeout_secs, 120);
        assert_eq!(config.retrieval.strategy, RetrievalStrategy::NoEdge);
        assert_eq!(config.matcher.embedding_threshold, EmbeddingMatcher::DEFAULT_THRESHOLD);
        assert_eq!(config.matcher().name(), "embedding");
        assert_eq!(config.current_time().unwrap().as_deref(), Some("2025-08-30 23:59:00"));
        assert_eq!(config.ollama().model, "qwen2.5:14b");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("egg.toml");
        let mut config = EggConfig::default();
        config.oracle.num_ctx = 32_000;
        config.retrieval.current_time = Some("2024-01-02 03:04:05".into());
        config.save(&path).unwrap();
        assert_eq!(EggConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("egg.toml");
        std::fs::write(&path, "[retrieval]\ncurrent_time = \"yesterday\"\n").unwrap();
        assert!(matches!(EggConfig::load(&path), Err(ConfigError::Invalid { .. })));

        std::fs::write(&path, "[oracle]\ntimeout_secs = 0\n").unwrap();
        assert!(matches!(EggConfig::load(&path), Err(ConfigError::Invalid { .. })));

        std::fs::write(&path, "[oracle\n").unwrap();
        assert!(matches!(EggConfig::load(&path), Err(ConfigError::Parse { .. })));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(EggConfig::load(&missing), Err(ConfigError::Read { .. })));
    }
}

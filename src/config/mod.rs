//! Engine configuration.
//!
//! One nested [`Config`] covers every component, loadable from a TOML file
//! and fully defaulted, so embedders only write the sections they change.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{GraphRagError, Result};
use crate::detection::{Algorithm, DetectionConfig};
use crate::ollama::OllamaConfig;
use crate::query::QaConfig;
use crate::summarize::{SummarizerConfig, SummaryLevel};

/// Detection defaults used when the caller does not pass explicit
/// parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionDefaults {
    /// Algorithm to run.
    pub algorithm: Algorithm,
    /// Resolution parameter; must be positive.
    pub resolution: f64,
    /// Convergence tuning.
    #[serde(flatten)]
    pub tuning: DetectionConfig,
}

impl Default for DetectionDefaults {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Louvain,
            resolution: 1.0,
            tuning: DetectionConfig::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Community detection defaults.
    pub detection: DetectionDefaults,
    /// Summarizer tuning.
    pub summarizer: SummarizerConfig,
    /// Default summary level for batch runs.
    pub summary_level: Option<SummaryLevel>,
    /// Question answering tuning.
    pub qa: QaConfig,
    /// Ollama connection settings.
    pub ollama: OllamaConfig,
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&text)
            .map_err(|err| GraphRagError::config(format!("invalid config file: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints the type system cannot.
    pub fn validate(&self) -> Result<()> {
        if self.detection.resolution <= 0.0 || !self.detection.resolution.is_finite() {
            return Err(GraphRagError::config(format!(
                "detection.resolution must be > 0, got {}",
                self.detection.resolution
            )));
        }
        if self.detection.tuning.max_iterations == 0 {
            return Err(GraphRagError::config(
                "detection.max_iterations must be > 0",
            ));
        }
        if self.summarizer.max_concurrent == 0 {
            return Err(GraphRagError::config(
                "summarizer.max_concurrent must be > 0",
            ));
        }
        if self.summarizer.max_context_nodes == 0 {
            return Err(GraphRagError::config(
                "summarizer.max_context_nodes must be > 0",
            ));
        }
        if self.qa.top_k == 0 {
            return Err(GraphRagError::config("qa.top_k must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.qa.relevance_threshold) {
            return Err(GraphRagError::config(format!(
                "qa.relevance_threshold must be within [0, 1], got {}",
                self.qa.relevance_threshold
            )));
        }
        Ok(())
    }
}

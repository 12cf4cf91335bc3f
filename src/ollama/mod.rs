//! Ollama backend for the [`LanguageModel`] trait.
//!
//! Talks to a local Ollama daemon over its HTTP generate endpoint. The
//! summarizer and QA engine stay backend-agnostic; this module is the only
//! place that knows the wire format.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{GraphRagError, Result};
use crate::generation::LanguageModel;

/// Connection settings for an Ollama daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Daemon host.
    pub host: String,
    /// Daemon port.
    pub port: u16,
    /// Model tag, e.g. "llama3.2".
    pub model: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling temperature.
    pub temperature: f64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            model: "llama3.2".to_string(),
            timeout_secs: 120,
            temperature: 0.3,
        }
    }
}

impl OllamaConfig {
    fn generate_url(&self) -> String {
        format!("http://{}:{}/api/generate", self.host, self.port)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f64,
    num_predict: usize,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP client for one Ollama daemon.
pub struct OllamaClient {
    config: OllamaConfig,
    agent: ureq::Agent,
}

impl OllamaClient {
    /// Creates a client; does not probe the daemon.
    pub fn new(config: OllamaConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { config, agent }
    }

    fn request(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: max_tokens,
            },
        };

        let response = self
            .agent
            .post(&self.config.generate_url())
            .send_json(serde_json::to_value(&body)?)
            .map_err(|err| GraphRagError::Generation {
                message: format!("ollama request failed: {err}"),
            })?;

        let parsed: GenerateResponse =
            response.into_json().map_err(|err| GraphRagError::Generation {
                message: format!("ollama returned malformed json: {err}"),
            })?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        tracing::debug!(
            model = %self.config.model,
            prompt_chars = prompt.len(),
            max_tokens,
            "ollama generate"
        );
        // ureq blocks, so hop to the blocking pool rather than stall the
        // async executor for the duration of a model call.
        let client = self.clone_for_request();
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || client.request(&prompt, max_tokens))
            .await
            .map_err(|err| GraphRagError::Generation {
                message: format!("ollama request task failed: {err}"),
            })?
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

impl OllamaClient {
    fn clone_for_request(&self) -> Self {
        Self {
            config: self.config.clone(),
            agent: self.agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_local_daemon() {
        let config = OllamaConfig::default();
        assert_eq!(config.generate_url(), "http://localhost:11434/api/generate");
    }
}

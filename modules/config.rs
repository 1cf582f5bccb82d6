//! Batch configuration
//!
//! A flat JSON document with camelCase keys. Missing keys fall back to defaults, so an
//! empty object `{}` is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::modules::failover::FailoverSettings;
use crate::modules::generation::{Credential, GenerationOptions};
use crate::modules::segmenter::SegmentConfig;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert at converting technical documentation into natural, spoken language optimized for text-to-speech systems.";

pub const DEFAULT_TRANSFORM_PROMPT: &str = "Convert the following text into a natural, spoken format that is easy to listen to. Maintain accuracy while making it conversational. Expand acronyms on first use. Convert formulas and special symbols into spoken words. Convert tables into narrative sentences. Describe figures and images clearly. Replace code blocks with descriptive explanations of what the code does. Preserve the logical order and headings. Add natural transitions between sections. Remove inline citations and footnotes.";

/// Settings for one batch transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchConfig {
    /// Target chunk size in estimated tokens
    pub batch_size: usize,
    pub overlap_size: usize,
    /// Attempts per model before moving to the next one
    pub max_retries: u32,
    #[serde(alias = "retryDelay")]
    pub retry_delay_ms: u64,
    #[serde(alias = "rateLimitDelay")]
    pub rate_limit_delay_ms: u64,
    pub turbo_mode: bool,
    pub parallel_chunks: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    #[serde(alias = "apiTimeout")]
    pub api_timeout_secs: u64,
    pub model_priority: Vec<String>,
    pub system_prompt: String,
    pub transform_prompt: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10000,
            overlap_size: 200,
            max_retries: 3,
            retry_delay_ms: 2000,
            rate_limit_delay_ms: 1000,
            turbo_mode: false,
            parallel_chunks: 3,
            temperature: 1.0,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 4000,
            api_timeout_secs: 60,
            model_priority: vec![
                "amazon.nova-pro-v1:0".to_string(),
                "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
                "amazon.nova-lite-v1:0".to_string(),
                "amazon.nova-micro-v1:0".to_string(),
            ],
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            transform_prompt: DEFAULT_TRANSFORM_PROMPT.to_string(),
        }
    }
}

impl BatchConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse batch configuration")
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .context(format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&content).context(format!("Invalid config file {}", path.display()))
    }

    /// Every problem found, empty when the configuration is usable
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !(1000..=50000).contains(&self.batch_size) {
            problems.push(format!("batchSize must be between 1000 and 50000, got {}", self.batch_size));
        }
        if self.overlap_size >= self.batch_size {
            problems.push(format!(
                "overlapSize ({}) must be smaller than batchSize ({})",
                self.overlap_size, self.batch_size
            ));
        }
        if self.max_retries > 10 {
            problems.push(format!("maxRetries must be between 0 and 10, got {}", self.max_retries));
        }
        if !(1..=10).contains(&self.parallel_chunks) {
            problems.push(format!("parallelChunks must be between 1 and 10, got {}", self.parallel_chunks));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            problems.push(format!("temperature must be between 0 and 2, got {}", self.temperature));
        }
        if self.model_priority.iter().all(|m| m.trim().is_empty()) {
            problems.push("modelPriority must name at least one model".to_string());
        }

        problems
    }

    /// Number of chunks dispatched together
    pub fn dispatch_width(&self) -> usize {
        if self.turbo_mode {
            self.parallel_chunks.max(1)
        } else {
            1
        }
    }

    pub fn segment_config(&self) -> SegmentConfig {
        SegmentConfig {
            target_tokens: self.batch_size,
            overlap_tokens: self.overlap_size,
        }
    }

    pub fn generation_options(&self) -> GenerationOptions {
        let system = self.system_prompt.trim();
        GenerationOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_output_tokens: self.max_output_tokens,
            system_instruction: (!system.is_empty()).then(|| system.to_string()),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn failover_settings(&self, primary: Credential, backup: Option<Credential>) -> FailoverSettings {
        FailoverSettings {
            models: self
                .model_priority
                .iter()
                .map(|m| m.trim())
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            primary,
            backup,
            options: self.generation_options(),
            max_retries_per_model: self.max_retries,
            retry_delay: self.retry_delay(),
            rate_limit_delay: self.rate_limit_delay(),
            timeout: self.api_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_takes_defaults() {
        let config = BatchConfig::from_json_str("{}").unwrap();
        assert_eq!(config, BatchConfig::default());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_partial_document_with_short_key_aliases() {
        let config = BatchConfig::from_json_str(
            r#"{"batchSize": 5000, "retryDelay": 10, "rateLimitDelayMs": 0, "apiTimeout": 5, "turboMode": true, "parallelChunks": 4}"#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 5000);
        assert_eq!(config.retry_delay(), Duration::from_millis(10));
        assert_eq!(config.rate_limit_delay(), Duration::ZERO);
        assert_eq!(config.api_timeout(), Duration::from_secs(5));
        assert_eq!(config.overlap_size, 200);
        assert_eq!(config.dispatch_width(), 4);
    }

    #[test]
    fn test_dispatch_width_is_one_without_turbo() {
        let config = BatchConfig {
            parallel_chunks: 8,
            ..Default::default()
        };
        assert_eq!(config.dispatch_width(), 1);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let config = BatchConfig {
            batch_size: 10,
            max_retries: 11,
            parallel_chunks: 0,
            temperature: 3.5,
            model_priority: vec![" ".to_string()],
            ..Default::default()
        };

        let problems = config.validate();
        assert_eq!(problems.len(), 6);
        assert!(problems.iter().any(|p| p.starts_with("batchSize")));
        assert!(problems.iter().any(|p| p.starts_with("overlapSize")));
        assert!(problems.iter().any(|p| p.starts_with("modelPriority")));
    }

    #[test]
    fn test_failover_settings_drop_blank_models() {
        let config = BatchConfig {
            model_priority: vec!["m1".into(), "  ".into(), " m2 ".into()],
            system_prompt: "   ".into(),
            ..Default::default()
        };

        let settings = config.failover_settings(Credential::new("a", "b"), None);
        assert_eq!(settings.models, vec!["m1", "m2"]);
        assert_eq!(settings.max_retries_per_model, 3);
        assert_eq!(settings.options.system_instruction, None);
        assert_eq!(settings.retry_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(BatchConfig::from_json_str("{\"batchSize\": \"big\"}").is_err());
    }
}

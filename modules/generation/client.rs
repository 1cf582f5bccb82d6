use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{FailureKind, GenerationFailure};
use super::types::{Credential, GeneratedText, GenerationOptions};
use crate::modules::persistence::{LogEntry, LogKind, LogLevel, RunStore};

/// An upstream text-generation endpoint
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        credential: &Credential,
        options: &GenerationOptions,
    ) -> Result<GeneratedText, GenerationFailure>;
}

/// Performs one bounded, logged generation call against a backend
pub struct GenerationClient {
    backend: Arc<dyn ModelBackend>,
    log_sink: Arc<dyn RunStore>,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn ModelBackend>, log_sink: Arc<dyn RunStore>) -> Self {
        Self { backend, log_sink }
    }

    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        credential: &Credential,
        options: &GenerationOptions,
        timeout: Duration,
    ) -> Result<GeneratedText, GenerationFailure> {
        self.write_log(LogEntry::new(
            LogLevel::Info,
            LogKind::ApiRequest,
            json!({
                "model": model,
                "promptLength": prompt.chars().count(),
                "credential": credential.redacted(),
                "maxOutputTokens": options.max_output_tokens,
            }),
        ))
        .await;

        let outcome = match tokio::time::timeout(
            timeout,
            self.backend.invoke(model, prompt, credential, options),
        )
        .await
        {
            Ok(Ok(generated)) if generated.text.trim().is_empty() => Err(GenerationFailure::new(
                FailureKind::Unknown,
                format!("model {} returned no content", model),
            )),
            Ok(result) => result,
            Err(_) => Err(GenerationFailure::timeout(timeout)),
        };

        let payload = match &outcome {
            Ok(generated) => json!({
                "model": model,
                "success": true,
                "usage": generated.usage,
            }),
            Err(failure) => json!({
                "model": model,
                "success": false,
                "status": failure.status,
                "kind": failure.kind,
                "error": failure.message,
            }),
        };
        let level = match &outcome {
            Ok(_) => LogLevel::Info,
            Err(failure) if failure.kind == FailureKind::RateLimited => LogLevel::Warn,
            Err(_) => LogLevel::Error,
        };
        self.write_log(LogEntry::new(level, LogKind::ApiResponse, payload)).await;

        match &outcome {
            Ok(generated) => debug!("Model {} returned {} chars", model, generated.text.len()),
            Err(failure) => debug!("Model {} failed: {}", model, failure),
        }

        outcome
    }

    async fn write_log(&self, entry: LogEntry) {
        if let Err(e) = self.log_sink.add_log_entry(entry).await {
            warn!("Failed to write generation log entry: {}", e);
        }
    }
}

/// Backend that answers with the prompt itself. Used for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoBackend;

#[async_trait]
impl ModelBackend for EchoBackend {
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        _credential: &Credential,
        _options: &GenerationOptions,
    ) -> Result<GeneratedText, GenerationFailure> {
        Ok(GeneratedText {
            text: prompt.to_string(),
            model: model.to_string(),
            usage: None,
        })
    }
}

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_bedrockruntime::config::http::HttpResponse;
use aws_sdk_bedrockruntime::config::Credentials;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::operation::invoke_model::InvokeModelError;
use aws_sdk_bedrockruntime::{primitives::Blob, Client as BedrockClient};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::client::ModelBackend;
use super::error::{FailureKind, GenerationFailure};
use super::types::{Credential, GeneratedText, GenerationOptions, TokenUsage};

/// Bedrock backend. Each credential gets its own signed client, built on first use.
pub struct ModelRunner {
    sdk_config: SdkConfig,
    clients: Mutex<HashMap<String, BedrockClient>>,
}

impl ModelRunner {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self {
            sdk_config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, credential: &Credential) -> BedrockClient {
        let mut clients = self.clients.lock().await;
        clients
            .entry(credential.access_key_id.clone())
            .or_insert_with(|| {
                let provider = Credentials::new(
                    credential.access_key_id.clone(),
                    credential.secret_access_key.clone(),
                    credential.session_token.clone(),
                    None,
                    "batch-transform",
                );
                let config = aws_sdk_bedrockruntime::config::Builder::from(&self.sdk_config)
                    .credentials_provider(provider)
                    .build();
                BedrockClient::from_conf(config)
            })
            .clone()
    }

    /// Build request body based on model type
    pub fn build_request_body(model_id: &str, prompt: &str, options: &GenerationOptions) -> Value {
        let system = options.system_instruction.as_deref().filter(|s| !s.trim().is_empty());

        match model_id {
            id if id.starts_with("amazon.nova") => {
                let mut body = json!({
                    "messages": [
                        {
                            "role": "user",
                            "content": [{ "text": prompt }]
                        }
                    ],
                    "inferenceConfig": {
                        "max_new_tokens": options.max_output_tokens,
                        "temperature": options.temperature,
                        "top_p": options.top_p,
                        "top_k": options.top_k
                    }
                });
                if let Some(system) = system {
                    body["system"] = json!([{ "text": system }]);
                }
                body
            }
            id if id.starts_with("anthropic.claude-3") => {
                let mut body = json!({
                    "anthropic_version": "bedrock-2023-05-31",
                    "max_tokens": options.max_output_tokens,
                    "temperature": options.temperature,
                    "top_p": options.top_p,
                    "top_k": options.top_k,
                    "messages": [
                        {
                            "role": "user",
                            "content": prompt
                        }
                    ]
                });
                if let Some(system) = system {
                    body["system"] = json!(system);
                }
                body
            }
            id if id.starts_with("mistral.") => {
                json!({
                    "prompt": format!("<s>[INST] {} [/INST]", with_system(system, prompt)),
                    "max_tokens": options.max_output_tokens,
                    "temperature": options.temperature,
                    "top_p": options.top_p,
                    "top_k": options.top_k
                })
            }
            id if id.starts_with("meta.llama") => {
                json!({
                    "prompt": with_system(system, prompt),
                    "max_gen_len": options.max_output_tokens,
                    "temperature": options.temperature,
                    "top_p": options.top_p
                })
            }
            id if id.starts_with("amazon.titan") => {
                json!({
                    "inputText": with_system(system, prompt),
                    "textGenerationConfig": {
                        "maxTokenCount": options.max_output_tokens,
                        "temperature": options.temperature,
                        "topP": options.top_p
                    }
                })
            }
            _ => {
                json!({
                    "prompt": with_system(system, prompt),
                    "max_tokens": options.max_output_tokens,
                    "temperature": options.temperature,
                    "top_p": options.top_p
                })
            }
        }
    }

    /// Extract output from response based on model type
    pub fn extract_output(model_id: &str, response_body: &Value) -> String {
        let output = match model_id {
            id if id.starts_with("amazon.nova") => {
                response_body["output"]["message"]["content"][0]["text"].as_str()
            }
            id if id.starts_with("anthropic.claude-3") => response_body["content"][0]["text"].as_str(),
            id if id.starts_with("mistral.") => response_body["outputs"][0]["text"].as_str(),
            id if id.starts_with("meta.llama") => response_body["generation"].as_str(),
            id if id.starts_with("amazon.titan") => response_body["results"][0]["outputText"].as_str(),
            // Fallback for other models - try multiple common response formats
            _ => response_body["completion"]
                .as_str()
                .or_else(|| response_body["text"].as_str())
                .or_else(|| response_body["outputs"][0]["text"].as_str())
                .or_else(|| response_body["content"][0]["text"].as_str())
                .or_else(|| response_body["generation"].as_str())
                .or_else(|| response_body["results"][0]["outputText"].as_str())
                .or_else(|| response_body["output"]["message"]["content"][0]["text"].as_str()),
        };

        output.unwrap_or_default().to_string()
    }

    /// Extract token usage from response
    pub fn extract_token_usage(response_body: &Value) -> Option<TokenUsage> {
        let usage = &response_body["usage"];

        // Nova style
        if let (Some(input), Some(output)) = (usage["inputTokens"].as_u64(), usage["outputTokens"].as_u64()) {
            return Some(TokenUsage::new(clamp_count(input), clamp_count(output)));
        }

        // Anthropic style
        if let (Some(input), Some(output)) = (usage["input_tokens"].as_u64(), usage["output_tokens"].as_u64()) {
            return Some(TokenUsage::new(clamp_count(input), clamp_count(output)));
        }

        // Llama style
        if let (Some(input), Some(output)) = (
            response_body["prompt_token_count"].as_u64(),
            response_body["generation_token_count"].as_u64(),
        ) {
            return Some(TokenUsage::new(clamp_count(input), clamp_count(output)));
        }

        // Bedrock invocation metrics
        let metrics = &response_body["amazon-bedrock-invocationMetrics"];
        if let (Some(input), Some(output)) = (
            metrics["inputTokenCount"].as_u64(),
            metrics["outputTokenCount"].as_u64(),
        ) {
            return Some(TokenUsage::new(clamp_count(input), clamp_count(output)));
        }

        None
    }
}

fn with_system(system: Option<&str>, prompt: &str) -> String {
    match system {
        Some(system) => format!("{}\n\n{}", system, prompt),
        None => prompt.to_string(),
    }
}

fn clamp_count(count: u64) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Modeled Bedrock exceptions first, then the HTTP status. Quota exhaustion answers 400
/// but asks for backoff like throttling does.
fn classify_service_error(e: &InvokeModelError, status: Option<u16>) -> FailureKind {
    if e.is_access_denied_exception() {
        FailureKind::AuthFailure
    } else if e.is_throttling_exception()
        || e.is_service_quota_exceeded_exception()
        || e.is_model_not_ready_exception()
    {
        FailureKind::RateLimited
    } else if e.is_validation_exception() {
        FailureKind::BadRequest
    } else if e.is_resource_not_found_exception() {
        FailureKind::NotFound
    } else if e.is_internal_server_exception()
        || e.is_service_unavailable_exception()
        || e.is_model_timeout_exception()
    {
        FailureKind::ServerError
    } else {
        status.map(FailureKind::from_status).unwrap_or(FailureKind::Unknown)
    }
}

/// Map an SDK error onto the failure taxonomy
fn classify_sdk_error(model_id: &str, err: SdkError<InvokeModelError, HttpResponse>) -> GenerationFailure {
    let status = err.raw_response().map(|r| r.status().as_u16());

    let failure = match &err {
        SdkError::TimeoutError(_) => GenerationFailure::new(
            FailureKind::Timeout,
            format!("Bedrock call to {} timed out", model_id),
        ),
        SdkError::ServiceError(service) => {
            let e = service.err();
            let message = e.message().unwrap_or("no message").to_string();
            GenerationFailure::new(classify_service_error(e, status), format!("{}: {}", model_id, message))
        }
        _ => GenerationFailure::new(
            status.map(FailureKind::from_status).unwrap_or(FailureKind::Unknown),
            format!("{}: {}", model_id, DisplayErrorContext(&err)),
        ),
    };

    match status {
        Some(code) => failure.with_status(code),
        None => failure,
    }
}

#[async_trait]
impl ModelBackend for ModelRunner {
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        credential: &Credential,
        options: &GenerationOptions,
    ) -> Result<GeneratedText, GenerationFailure> {
        let request_body = Self::build_request_body(model, prompt, options);
        info!("Invoking model {} with {} character prompt", model, prompt.len());

        let client = self.client_for(credential).await;
        let response = client
            .invoke_model()
            .model_id(model)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(request_body.to_string().into_bytes()))
            .send()
            .await
            .map_err(|e| classify_sdk_error(model, e))?;

        let response_body: Value = serde_json::from_slice(response.body().as_ref()).map_err(|e| {
            GenerationFailure::new(FailureKind::Unknown, format!("Failed to parse Bedrock response: {}", e))
        })?;

        let text = Self::extract_output(model, &response_body);
        let usage = Self::extract_token_usage(&response_body);

        if text.trim().is_empty() {
            debug!("Empty response body from {}: {}", model, response_body);
        }

        Ok(GeneratedText {
            text,
            model: model.to_string(),
            usage,
        })
    }
}

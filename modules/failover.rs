//! Retry and failover across an ordered model list and two credentials
//!
//! Rate limiting and server faults are retried in place with backoff. Authentication
//! failures switch to the backup credential once, and end the call if there is none.
//! A model that exhausts its retry budget hands over to the next model in the list.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::modules::generation::{
    Credential, FailureKind, GeneratedText, GenerationClient, GenerationFailure, GenerationOptions,
};

/// Everything one failover call needs, rebuilt from configuration for each run
#[derive(Debug, Clone)]
pub struct FailoverSettings {
    /// Candidate models, highest priority first
    pub models: Vec<String>,
    pub primary: Credential,
    pub backup: Option<Credential>,
    pub options: GenerationOptions,
    pub max_retries_per_model: u32,
    /// Base of the exponential backoff for non rate-limit failures
    pub retry_delay: Duration,
    /// Base of the linear backoff for rate-limit failures
    pub rate_limit_delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TerminalFailure {
    #[error("Authentication failed and no backup credential is available: {0}")]
    Auth(GenerationFailure),

    #[error("All models failed after {max_retries} retries. Last error: {}", describe_last(.last))]
    Exhausted {
        max_retries: u32,
        attempts: u32,
        last: Option<GenerationFailure>,
    },
}

fn describe_last(last: &Option<GenerationFailure>) -> String {
    match last {
        Some(failure) => failure.to_string(),
        None => "Unknown error".to_string(),
    }
}

impl TerminalFailure {
    pub fn last_failure(&self) -> Option<&GenerationFailure> {
        match self {
            TerminalFailure::Auth(failure) => Some(failure),
            TerminalFailure::Exhausted { last, .. } => last.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveCredential {
    Primary,
    Backup,
}

/// Credential selection state of a single call
struct FailoverContext<'a> {
    primary: &'a Credential,
    backup: Option<&'a Credential>,
    active: ActiveCredential,
}

impl<'a> FailoverContext<'a> {
    fn new(primary: &'a Credential, backup: Option<&'a Credential>) -> Self {
        Self {
            primary,
            backup,
            active: ActiveCredential::Primary,
        }
    }

    fn credential(&self) -> &'a Credential {
        match (self.active, self.backup) {
            (ActiveCredential::Backup, Some(backup)) => backup,
            _ => self.primary,
        }
    }

    /// One-way switch; false if there is no backup or it is already in use
    fn switch_to_backup(&mut self) -> bool {
        if self.backup.is_some() && self.active == ActiveCredential::Primary {
            self.active = ActiveCredential::Backup;
            true
        } else {
            false
        }
    }
}

pub struct FailoverPolicy {
    client: Arc<GenerationClient>,
    settings: FailoverSettings,
}

impl FailoverPolicy {
    pub fn new(client: Arc<GenerationClient>, settings: FailoverSettings) -> Self {
        Self { client, settings }
    }

    /// Generate text for one prompt. Credential state lives only for this call.
    pub async fn run(&self, prompt: &str) -> Result<GeneratedText, TerminalFailure> {
        let settings = &self.settings;
        let max_retries = settings.max_retries_per_model;
        let mut context = FailoverContext::new(&settings.primary, settings.backup.as_ref());
        let mut last_failure: Option<GenerationFailure> = None;
        let mut attempts = 0u32;

        for model in &settings.models {
            let mut attempt = 0u32;

            while attempt < max_retries {
                attempts += 1;
                let result = self
                    .client
                    .generate(model, prompt, context.credential(), &settings.options, settings.timeout)
                    .await;

                let failure = match result {
                    Ok(generated) => return Ok(generated),
                    Err(failure) => failure,
                };
                last_failure = Some(failure.clone());

                match failure.kind {
                    FailureKind::RateLimited => {
                        tokio::time::sleep(settings.rate_limit_delay.saturating_mul(attempt + 1)).await;

                        if attempt == max_retries / 2 && context.switch_to_backup() {
                            info!("Rate limited on {}, switched to backup credential", model);
                        }
                        attempt += 1;
                    }
                    FailureKind::AuthFailure => {
                        if context.switch_to_backup() {
                            warn!("Auth error on {}, switched to backup credential", model);
                            continue;
                        }
                        return Err(TerminalFailure::Auth(failure));
                    }
                    _ => {
                        if attempt + 1 < max_retries {
                            let backoff = settings.retry_delay.saturating_mul(2u32.saturating_pow(attempt));
                            tokio::time::sleep(backoff).await;
                            attempt += 1;
                        } else {
                            warn!("Model {} failed {} times, trying next model: {}", model, max_retries, failure);
                            break;
                        }
                    }
                }
            }
        }

        Err(TerminalFailure::Exhausted {
            max_retries,
            attempts,
            last: last_failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::generation::ModelBackend;
    use crate::modules::persistence::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Answers per (model, access key) from a fixed table and records every call
    struct ScriptedBackend {
        rule: Box<dyn Fn(&str, &str, usize) -> Result<String, FailureKind> + Send + Sync>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedBackend {
        fn new(rule: impl Fn(&str, &str, usize) -> Result<String, FailureKind> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                rule: Box::new(rule),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn invoke(
            &self,
            model: &str,
            _prompt: &str,
            credential: &Credential,
            _options: &GenerationOptions,
        ) -> Result<GeneratedText, GenerationFailure> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((model.to_string(), credential.access_key_id.clone()));
                calls.len() - 1
            };
            match (self.rule)(model, &credential.access_key_id, index) {
                Ok(text) => Ok(GeneratedText { text, model: model.to_string(), usage: None }),
                Err(kind) => Err(GenerationFailure::new(kind, format!("{:?}", kind))),
            }
        }
    }

    fn settings(models: &[&str], backup: bool, max_retries: u32) -> FailoverSettings {
        FailoverSettings {
            models: models.iter().map(|m| m.to_string()).collect(),
            primary: Credential::new("primary-key", "s1"),
            backup: backup.then(|| Credential::new("backup-key", "s2")),
            options: GenerationOptions::default(),
            max_retries_per_model: max_retries,
            retry_delay: Duration::from_millis(2000),
            rate_limit_delay: Duration::from_millis(1000),
            timeout: Duration::from_secs(60),
        }
    }

    fn policy(backend: Arc<ScriptedBackend>, settings: FailoverSettings) -> FailoverPolicy {
        let client = GenerationClient::new(backend, Arc::new(MemoryStore::new()));
        FailoverPolicy::new(Arc::new(client), settings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_every_model_budget() {
        let backend = ScriptedBackend::new(|_, _, _| Err(FailureKind::ServerError));
        let policy = policy(backend.clone(), settings(&["m1", "m2"], false, 3));

        let failure = policy.run("prompt").await.unwrap_err();

        assert_eq!(backend.calls().len(), 6);
        match failure {
            TerminalFailure::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 6);
                assert_eq!(last.unwrap().kind, FailureKind::ServerError);
            }
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_skips_wait_after_last_attempt() {
        let backend = ScriptedBackend::new(|_, _, _| Err(FailureKind::ServerError));
        let policy = policy(backend, settings(&["m1"], false, 3));

        let started = Instant::now();
        let _ = policy.run("prompt").await;

        // 2000ms after attempt 0, 4000ms after attempt 1, nothing after the last
        assert_eq!(started.elapsed(), Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_switches_to_backup_without_spending_budget() {
        let backend = ScriptedBackend::new(|_, key, _| {
            if key == "primary-key" { Err(FailureKind::AuthFailure) } else { Ok("done".into()) }
        });
        let policy = policy(backend.clone(), settings(&["m1"], true, 1));

        let generated = policy.run("prompt").await.unwrap();

        assert_eq!(generated.text, "done");
        assert_eq!(
            backend.calls(),
            vec![
                ("m1".to_string(), "primary-key".to_string()),
                ("m1".to_string(), "backup-key".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_without_backup_is_terminal_immediately() {
        let backend = ScriptedBackend::new(|_, _, _| Err(FailureKind::AuthFailure));
        let policy = policy(backend.clone(), settings(&["m1", "m2"], false, 3));

        let failure = policy.run("prompt").await.unwrap_err();

        assert!(matches!(failure, TerminalFailure::Auth(_)));
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_on_backup_is_terminal() {
        let backend = ScriptedBackend::new(|_, _, _| Err(FailureKind::AuthFailure));
        let policy = policy(backend.clone(), settings(&["m1", "m2"], true, 3));

        let failure = policy.run("prompt").await.unwrap_err();

        assert!(matches!(failure, TerminalFailure::Auth(_)));
        assert_eq!(backend.calls().len(), 2);
        assert_eq!(failure.last_failure().unwrap().kind, FailureKind::AuthFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backs_off_linearly_and_switches_at_midpoint() {
        // fails on primary, succeeds once the backup key is in use
        let backend = ScriptedBackend::new(|_, key, _| {
            if key == "primary-key" { Err(FailureKind::RateLimited) } else { Ok("ok".into()) }
        });
        let policy = policy(backend.clone(), settings(&["m1"], true, 4));

        let started = Instant::now();
        let generated = policy.run("prompt").await.unwrap();

        assert_eq!(generated.text, "ok");
        let keys: Vec<String> = backend.calls().into_iter().map(|(_, key)| key).collect();
        // midpoint of 4 is attempt index 2: attempts 0,1,2 on primary, then backup
        assert_eq!(keys, vec!["primary-key", "primary-key", "primary-key", "backup-key"]);
        assert_eq!(started.elapsed(), Duration::from_millis(1000 + 2000 + 3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_through_to_next_model() {
        let backend = ScriptedBackend::new(|model, _, _| {
            if model == "m1" { Err(FailureKind::NotFound) } else { Ok("from m2".into()) }
        });
        let policy = policy(backend.clone(), settings(&["m1", "m2"], false, 2));

        let generated = policy.run("prompt").await.unwrap();

        assert_eq!(generated.model, "m2");
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_stays_active_for_later_models() {
        let backend = ScriptedBackend::new(|model, key, _| match (model, key) {
            (_, "primary-key") => Err(FailureKind::AuthFailure),
            ("m1", _) => Err(FailureKind::BadRequest),
            _ => Ok("ok".into()),
        });
        let policy = policy(backend.clone(), settings(&["m1", "m2"], true, 1));

        let generated = policy.run("prompt").await.unwrap();

        assert_eq!(generated.model, "m2");
        assert_eq!(backend.calls().last().unwrap().1, "backup-key");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_makes_no_attempts() {
        let backend = ScriptedBackend::new(|_, _, _| Ok("never".into()));
        let policy = policy(backend.clone(), settings(&["m1"], false, 0));

        let failure = policy.run("prompt").await.unwrap_err();

        assert!(backend.calls().is_empty());
        assert_eq!(failure.last_failure(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_credential_state_per_call() {
        // first call hits an auth failure on primary; the second call must start on primary again
        let backend = ScriptedBackend::new(|_, key, index| {
            if index == 0 && key == "primary-key" { Err(FailureKind::AuthFailure) } else { Ok("ok".into()) }
        });
        let policy = policy(backend.clone(), settings(&["m1"], true, 3));

        policy.run("first").await.unwrap();
        policy.run("second").await.unwrap();

        let keys: Vec<String> = backend.calls().into_iter().map(|(_, key)| key).collect();
        assert_eq!(keys, vec!["primary-key", "backup-key", "primary-key"]);
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Category of a failed generation call. Drives the failover decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    AuthFailure,
    RateLimited,
    BadRequest,
    NotFound,
    ServerError,
    Unknown,
}

impl FailureKind {
    /// Classify an HTTP status code. `Timeout` is reserved for the local call deadline,
    /// so an upstream 408 counts as a server fault.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => FailureKind::AuthFailure,
            429 => FailureKind::RateLimited,
            400 => FailureKind::BadRequest,
            404 => FailureKind::NotFound,
            408 => FailureKind::ServerError,
            s if s >= 500 => FailureKind::ServerError,
            _ => FailureKind::Unknown,
        }
    }
}

/// A single failed call, classified
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationFailure {
    pub kind: FailureKind,
    /// Upstream status code, when the failure came from a response
    pub status: Option<u16>,
    pub message: String,
}

impl GenerationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(FailureKind::Timeout, format!("request timeout after {}ms", after.as_millis()))
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    fn code(&self) -> String {
        self.status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
    }
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FailureKind::Timeout => write!(f, "Timeout: {}", self.message),
            FailureKind::AuthFailure => write!(
                f,
                "Credential invalid or unauthorized ({}): {}",
                self.code(),
                self.message
            ),
            FailureKind::RateLimited => write!(
                f,
                "Rate limit exceeded ({}): {}. Try increasing the rate limit delay or reducing parallel chunks",
                self.code(),
                self.message
            ),
            FailureKind::BadRequest => write!(
                f,
                "Bad request ({}): {}. Check the prompt or model settings",
                self.code(),
                self.message
            ),
            FailureKind::NotFound => write!(
                f,
                "Model not found ({}): {}",
                self.code(),
                self.message
            ),
            FailureKind::ServerError => write!(f, "Server error ({}): {}", self.code(), self.message),
            FailureKind::Unknown => write!(f, "Generation error ({}): {}", self.code(), self.message),
        }
    }
}

impl std::error::Error for GenerationFailure {}

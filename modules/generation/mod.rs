//! Generation client
//!
//! One call against one model with one credential: bounded by a timeout, classified
//! into a [`FailureKind`] on failure, and reported to the activity log either way.

pub mod types;
pub mod error;
pub mod client;
pub mod model_runner;

pub use types::{redact_secret, Credential, GeneratedText, GenerationOptions, TokenUsage};
pub use error::{FailureKind, GenerationFailure};
pub use client::{EchoBackend, GenerationClient, ModelBackend};
pub use model_runner::ModelRunner;

//! # Batch Transform Library
//!
//! Transforms long documents with rate-limited text-generation models:
//! - Segmentation into overlapping chunks sized to a token budget
//! - Model runner for AWS Bedrock integration
//! - Retry with backoff, backup credential and model failover
//! - Batch engine with pause, cancel, progress events and order-stable assembly
//!
//! ## Example Usage
//!
//! ```no_run
//! use batch_transform_lib::{
//!     BatchConfig, BatchEngine, Credential, GenerationClient, MemoryStore, ModelRunner, Segmenter,
//! };
//! use aws_config::BehaviorVersion;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
//!     let config = BatchConfig::default();
//!
//!     let chunks = Segmenter::with_config(config.segment_config()).segment("A long document...");
//!
//!     let store = Arc::new(MemoryStore::new());
//!     let client = Arc::new(GenerationClient::new(Arc::new(ModelRunner::new(sdk_config)), store.clone()));
//!     let engine = BatchEngine::new(
//!         config.clone(),
//!         client,
//!         store,
//!         Credential::new("AKIA...", "secret"),
//!         None,
//!     );
//!
//!     engine.run(chunks, config.dispatch_width()).await?;
//!     println!("{}", engine.assemble_text());
//!
//!     Ok(())
//! }
//! ```

// Include the modules from the modules directory
#[path = "../modules/mod.rs"]
pub mod modules;

// Re-export everything from modules for easy access
pub use modules::*;

// Re-export commonly used external types for convenience
pub use anyhow::{Context, Result};
pub use aws_sdk_bedrockruntime::Client as BedrockClient;
pub use aws_sdk_s3::Client as S3Client;
pub use tokio;
pub use tracing;

/// Version information for the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library information
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

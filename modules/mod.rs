//! Library modules for batch text transformation
//!
//! This library provides modules for:
//! - Segmenting long documents into overlapping, token-budgeted chunks
//! - Single-call generation against AWS Bedrock with failure classification
//! - Retry and credential/model failover
//! - Batch dispatch with pause, cancel, progress events and reports
//! - Persistence of run state to memory or S3

pub mod config;
pub mod segmenter;
pub mod generation;
pub mod failover;
pub mod persistence;
pub mod batch_engine;

// Re-export commonly used types and structs
pub use config::BatchConfig;
pub use segmenter::{estimate_tokens, Chunk, ChunkState, SegmentConfig, Segmenter};
pub use generation::{
    Credential, EchoBackend, FailureKind, GeneratedText, GenerationClient, GenerationFailure,
    GenerationOptions, ModelBackend, ModelRunner, TokenUsage,
};
pub use failover::{FailoverPolicy, FailoverSettings, TerminalFailure};
pub use persistence::{LogEntry, LogKind, LogLevel, MemoryStore, RunStore, S3Store, StoreError};
pub use batch_engine::{
    BatchEngine, BatchEvent, ChunkStage, EngineError, MarkdownBuilder, MarkdownFormatter, RunControl, RunStats,
};

//! Persistence port for run state and the activity log
//!
//! The engine saves an immutable snapshot of a chunk after every state transition and
//! appends log entries for every generation attempt and every failed chunk. Writes are
//! best effort once a run is underway; only the initial save is allowed to fail a run.

pub mod memory;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::modules::segmenter::Chunk;

pub use memory::MemoryStore;
pub use s3::S3Store;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage request failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    ApiRequest,
    ApiResponse,
    BatchError,
}

/// One activity log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub kind: LogKind,
    pub payload: Value,
}

impl LogEntry {
    pub fn new(level: LogLevel, kind: LogKind, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            kind,
            payload,
        }
    }
}

/// Storage for chunk snapshots and log entries, keyed by run id
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace the snapshot of one chunk
    async fn save_chunk(&self, run_id: &str, chunk: &Chunk) -> Result<(), StoreError>;

    /// All chunk snapshots of a run, ordered by sequence index
    async fn chunks_for_run(&self, run_id: &str) -> Result<Vec<Chunk>, StoreError>;

    /// Remove every snapshot of a run
    async fn delete_run(&self, run_id: &str) -> Result<(), StoreError>;

    async fn add_log_entry(&self, entry: LogEntry) -> Result<(), StoreError>;

    /// Most recent log entries first
    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError>;
}

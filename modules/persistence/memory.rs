use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{LogEntry, RunStore, StoreError};
use crate::modules::segmenter::Chunk;

/// In-process store. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<String, BTreeMap<usize, Chunk>>>,
    logs: RwLock<Vec<LogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of log entries written so far
    pub async fn log_count(&self) -> usize {
        self.logs.read().await.len()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn save_chunk(&self, run_id: &str, chunk: &Chunk) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        runs.entry(run_id.to_string())
            .or_default()
            .insert(chunk.sequence, chunk.clone());
        Ok(())
    }

    async fn chunks_for_run(&self, run_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs
            .get(run_id)
            .map(|chunks| chunks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), StoreError> {
        self.runs.write().await.remove(run_id);
        Ok(())
    }

    async fn add_log_entry(&self, entry: LogEntry) -> Result<(), StoreError> {
        self.logs.write().await.push(entry);
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        let logs = self.logs.read().await;
        Ok(logs.iter().rev().take(limit).cloned().collect())
    }
}

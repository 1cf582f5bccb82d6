//! Types shared by the batch engine and its consumers

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::modules::failover::TerminalFailure;
use crate::modules::generation::TokenUsage;
use crate::modules::persistence::StoreError;
use crate::modules::segmenter::{Chunk, ChunkState};

/// Stage reported with a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStage {
    Processing,
    Complete,
    Error,
}

/// Notifications emitted while a run is in flight
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Progress {
        /// Chunks in `success` at the time of the event
        completed: usize,
        total: usize,
        chunk: Chunk,
        stage: ChunkStage,
    },
    ChunkCompleted(Chunk),
    ChunkFailed {
        chunk: Chunk,
        sequence: usize,
        failure: TerminalFailure,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("A batch run is already in progress")]
    AlreadyRunning,

    #[error("Failed to persist initial state of run {run_id}: {source}")]
    Persistence {
        run_id: String,
        #[source]
        source: StoreError,
    },
}

/// Point-in-time summary of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub processing: usize,
    /// Share of chunks in `success`, 0 to 100
    pub percentage: f64,
    pub elapsed_ms: u64,
    pub eta_ms: u64,
    pub usage: TokenUsage,
}

impl RunStats {
    pub fn from_chunks(chunks: &[Chunk], elapsed_ms: u64) -> Self {
        let count = |state: ChunkState| chunks.iter().filter(|c| c.state == state).count();

        let total = chunks.len();
        let completed = count(ChunkState::Success);
        let pending = count(ChunkState::Pending);
        let eta_ms = if completed > 0 {
            (elapsed_ms as f64 / completed as f64 * pending as f64).round() as u64
        } else {
            0
        };
        let percentage = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let usage = chunks
            .iter()
            .filter_map(|c| c.usage)
            .fold(TokenUsage::default(), |acc, u| acc + u);

        Self {
            total,
            completed,
            failed: count(ChunkState::Error),
            pending,
            processing: count(ChunkState::Processing),
            percentage,
            elapsed_ms,
            eta_ms,
            usage,
        }
    }
}

/// Engine-owned record of the current run
#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub run_id: Option<String>,
    pub chunks: Vec<Chunk>,
    pub started_at: Option<Instant>,
    pub width: usize,
}

impl RunState {
    pub fn begin(run_id: String, chunks: Vec<Chunk>, width: usize) -> Self {
        Self {
            run_id: Some(run_id),
            chunks,
            started_at: Some(Instant::now()),
            width,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn completed(&self) -> usize {
        self.chunks.iter().filter(|c| c.state == ChunkState::Success).count()
    }
}

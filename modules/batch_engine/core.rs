//! Core batch dispatch logic

use futures::future::join_all;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::modules::config::BatchConfig;
use crate::modules::failover::{FailoverPolicy, TerminalFailure};
use crate::modules::generation::{Credential, GeneratedText, GenerationClient};
use crate::modules::persistence::{LogEntry, LogKind, LogLevel, RunStore};
use crate::modules::segmenter::{Chunk, ChunkState};

use super::control::RunControl;
use super::types::{BatchEvent, ChunkStage, EngineError, RunState, RunStats};

/// Drives a list of chunks through the failover policy
///
/// Owns the chunk records of the current run. Share it behind an `Arc` to pause, resume
/// or cancel from another task while `run` is in flight; only one run or retry pass may
/// execute at a time.
pub struct BatchEngine {
    config: BatchConfig,
    policy: FailoverPolicy,
    store: Arc<dyn RunStore>,
    control: RunControl,
    state: Mutex<RunState>,
    running: AtomicBool,
    events: Option<mpsc::UnboundedSender<BatchEvent>>,
}

/// Clears the running flag when a pass ends, even on early return
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BatchEngine {
    pub fn new(
        config: BatchConfig,
        client: Arc<GenerationClient>,
        store: Arc<dyn RunStore>,
        primary: Credential,
        backup: Option<Credential>,
    ) -> Self {
        let settings = config.failover_settings(primary, backup);
        Self {
            policy: FailoverPolicy::new(client, settings),
            config,
            store,
            control: RunControl::new(),
            state: Mutex::new(RunState::default()),
            running: AtomicBool::new(false),
            events: None,
        }
    }

    /// Sends progress and outcome events to `sender` for every run of this engine
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn pause(&self) {
        info!("Pausing batch run");
        self.control.pause();
    }

    pub fn resume(&self) {
        info!("Resuming batch run");
        self.control.resume();
    }

    pub fn cancel(&self) {
        info!("Cancelling batch run");
        self.control.cancel();
    }

    // === Running ===

    /// Runs every chunk under a freshly generated run id
    pub async fn run(&self, chunks: Vec<Chunk>, width: usize) -> Result<Vec<Chunk>, EngineError> {
        self.run_named(uuid::Uuid::new_v4().to_string(), chunks, width).await
    }

    /// Runs every chunk and returns their final snapshots in sequence order
    ///
    /// Chunks left untouched by a cancellation come back `pending`. Individual chunk
    /// failures never fail the run; only the initial persistence does.
    pub async fn run_named(
        &self,
        run_id: impl Into<String>,
        chunks: Vec<Chunk>,
        width: usize,
    ) -> Result<Vec<Chunk>, EngineError> {
        let _guard = self.acquire()?;
        let run_id = run_id.into();
        let width = width.max(1);

        let mut chunks = chunks;
        chunks.sort_by_key(|c| c.sequence);
        let total = chunks.len();

        self.control.reset();
        *self.lock_state() = RunState::begin(run_id.clone(), chunks.clone(), width);

        if chunks.is_empty() {
            info!("Run {} has no chunks to process", run_id);
            return Ok(Vec::new());
        }

        info!("Starting run {} with {} chunks (dispatch width {})", run_id, total, width);

        for chunk in &chunks {
            self.store
                .save_chunk(&run_id, chunk)
                .await
                .map_err(|source| EngineError::Persistence { run_id: run_id.clone(), source })?;
        }

        let indices: Vec<usize> = (0..total).collect();
        self.dispatch(&run_id, &indices, width).await;

        let stats = self.stats();
        info!(
            "Run {} finished: {}/{} succeeded, {} failed, {} pending",
            run_id, stats.completed, stats.total, stats.failed, stats.pending
        );

        Ok(self.chunks())
    }

    /// Re-dispatches every chunk in `error` with the width of the last run
    ///
    /// Does nothing once the run has been cancelled.
    pub async fn retry_failed(&self) -> Result<Vec<Chunk>, EngineError> {
        let _guard = self.acquire()?;

        let (run_id, failed, width) = {
            let state = self.lock_state();
            let failed: Vec<usize> = state
                .chunks
                .iter()
                .enumerate()
                .filter(|(_, c)| c.state == ChunkState::Error)
                .map(|(i, _)| i)
                .collect();
            (state.run_id.clone(), failed, state.width.max(1))
        };

        let Some(run_id) = run_id else {
            return Ok(Vec::new());
        };

        if failed.is_empty() {
            debug!("Run {} has no failed chunks to retry", run_id);
        } else if self.control.is_cancelled() {
            info!("Run {} was cancelled, not retrying {} failed chunks", run_id, failed.len());
        } else {
            info!("Retrying {} failed chunks of run {}", failed.len(), run_id);
            self.dispatch(&run_id, &failed, width).await;
        }

        Ok(self.chunks())
    }

    fn acquire(&self) -> Result<RunningGuard<'_>, EngineError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::AlreadyRunning)?;
        Ok(RunningGuard(&self.running))
    }

    /// Processes `indices` in consecutive groups of `width`
    async fn dispatch(&self, run_id: &str, indices: &[usize], width: usize) {
        let groups: Vec<&[usize]> = indices.chunks(width).collect();
        let group_count = groups.len();

        for (group_number, group) in groups.into_iter().enumerate() {
            if self.control.is_paused() {
                info!("Run {} paused before group {}/{}", run_id, group_number + 1, group_count);
            }
            if !self.control.wait_until_runnable().await {
                info!("Run {} cancelled before group {}/{}", run_id, group_number + 1, group_count);
                return;
            }

            if group.len() == 1 {
                self.process_chunk(run_id, group[0]).await;
            } else {
                debug!("Dispatching chunks {:?} concurrently", group);
                join_all(group.iter().map(|&index| self.process_chunk(run_id, index))).await;
            }

            let is_last = group_number + 1 == group_count;
            if !is_last && !self.control.sleep_unless_cancelled(self.config.rate_limit_delay()).await {
                info!("Run {} cancelled during rate limit delay", run_id);
                return;
            }
        }
    }

    async fn process_chunk(&self, run_id: &str, index: usize) {
        if self.control.is_cancelled() {
            return;
        }

        let (started, total) = {
            let mut state = self.lock_state();
            let total = state.chunks.len();
            let Some(chunk) = state.chunks.get_mut(index) else {
                return;
            };
            chunk.reset_for_retry();
            chunk.mark_processing();
            (chunk.clone(), total)
        };

        info!(
            "Processing chunk {}/{} ({} tokens, attempt {})",
            started.sequence + 1,
            total,
            started.token_estimate,
            started.attempts
        );
        self.emit_progress(started.clone(), ChunkStage::Processing);
        self.persist(run_id, &started).await;

        let prompt = format!("{}\n\n{}", self.config.transform_prompt, started.text);
        let outcome = self.policy.run(&prompt).await;

        let finished = self.record_outcome(index, &outcome);

        match outcome {
            Ok(generated) => {
                debug!("Chunk {} transformed by {}", finished.sequence + 1, generated.model);
                self.emit(BatchEvent::ChunkCompleted(finished.clone()));
            }
            Err(failure) => {
                error!("Chunk {} failed: {}", finished.sequence + 1, failure);
                self.emit(BatchEvent::ChunkFailed {
                    chunk: finished.clone(),
                    sequence: finished.sequence,
                    failure: failure.clone(),
                });
                self.log_chunk_failure(run_id, &finished, &failure).await;
            }
        }

        self.persist(run_id, &finished).await;

        let stage = if finished.state == ChunkState::Success {
            ChunkStage::Complete
        } else {
            ChunkStage::Error
        };
        self.emit_progress(finished, stage);
    }

    fn record_outcome(&self, index: usize, outcome: &Result<GeneratedText, TerminalFailure>) -> Chunk {
        let mut state = self.lock_state();
        let chunk = &mut state.chunks[index];
        match outcome {
            Ok(generated) => chunk.mark_success(generated.clone()),
            Err(failure) => chunk.mark_error(failure.to_string()),
        }
        chunk.clone()
    }

    async fn log_chunk_failure(&self, run_id: &str, chunk: &Chunk, failure: &TerminalFailure) {
        let entry = LogEntry::new(
            LogLevel::Error,
            LogKind::BatchError,
            json!({
                "runId": run_id,
                "chunkId": chunk.id,
                "sequence": chunk.sequence,
                "error": failure.to_string(),
                "attempts": chunk.attempts,
            }),
        );
        if let Err(e) = self.store.add_log_entry(entry).await {
            warn!("Failed to log failure of chunk {}: {}", chunk.sequence + 1, e);
        }
    }

    async fn persist(&self, run_id: &str, chunk: &Chunk) {
        if let Err(e) = self.store.save_chunk(run_id, chunk).await {
            warn!("Failed to persist chunk {} of run {}: {}", chunk.sequence + 1, run_id, e);
        }
    }

    fn emit_progress(&self, chunk: Chunk, stage: ChunkStage) {
        let (completed, total) = {
            let state = self.lock_state();
            (state.completed(), state.chunks.len())
        };
        self.emit(BatchEvent::Progress { completed, total, chunk, stage });
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(events) = &self.events {
            // a dropped receiver only means nobody is listening
            let _ = events.send(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Inspection ===

    pub fn run_id(&self) -> Option<String> {
        self.lock_state().run_id.clone()
    }

    /// Snapshots of every chunk of the current run, in sequence order
    pub fn chunks(&self) -> Vec<Chunk> {
        self.lock_state().chunks.clone()
    }

    pub fn stats(&self) -> RunStats {
        let state = self.lock_state();
        RunStats::from_chunks(&state.chunks, state.elapsed_ms())
    }

    /// Outputs of successful chunks in sequence order, separated by a blank line
    pub fn assemble_text(&self) -> String {
        let state = self.lock_state();
        assemble(&state.chunks)
    }
}

pub(crate) fn assemble(chunks: &[Chunk]) -> String {
    let mut successful: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| c.state == ChunkState::Success)
        .collect();
    successful.sort_by_key(|c| c.sequence);

    successful
        .iter()
        .filter_map(|c| c.output.as_deref())
        .collect::<Vec<_>>()
        .join("\n\n")
}

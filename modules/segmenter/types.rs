use serde::{Deserialize, Serialize};

use crate::modules::generation::{GeneratedText, TokenUsage};

/// Configuration for segmenting operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentConfig {
    /// Target size of a chunk in estimated tokens
    pub target_tokens: usize,
    /// How many estimated tokens of the previous chunk's tail are repeated at the start of the next
    pub overlap_tokens: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            target_tokens: 10_000,
            overlap_tokens: 200,
        }
    }
}

/// Lifecycle state of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Processing,
    Success,
    Error,
}

impl ChunkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkState::Pending => "pending",
            ChunkState::Processing => "processing",
            ChunkState::Success => "success",
            ChunkState::Error => "error",
        }
    }
}

impl std::fmt::Display for ChunkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of source text submitted as a single generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Opaque unique identifier
    pub id: String,
    /// Position in assembly order (0-based, contiguous)
    pub sequence: usize,
    /// Byte offset of the first character in the source text
    pub start: usize,
    /// Byte offset one past the last character (exclusive)
    pub end: usize,
    pub text: String,
    pub token_estimate: usize,
    pub state: ChunkState,
    pub attempts: u32,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Model that produced the successful output
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl Chunk {
    pub fn new(sequence: usize, start: usize, end: usize, text: String) -> Self {
        let token_estimate = estimate_tokens(&text);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sequence,
            start,
            end,
            text,
            token_estimate,
            state: ChunkState::Pending,
            attempts: 0,
            output: None,
            error: None,
            model: None,
            usage: None,
        }
    }

    pub fn mark_processing(&mut self) {
        self.state = ChunkState::Processing;
        self.attempts += 1;
    }

    pub fn mark_success(&mut self, generated: GeneratedText) {
        self.state = ChunkState::Success;
        self.output = Some(generated.text);
        self.model = Some(generated.model);
        self.usage = generated.usage;
        self.error = None;
    }

    pub fn mark_error(&mut self, description: impl Into<String>) {
        self.state = ChunkState::Error;
        self.error = Some(description.into());
        self.output = None;
        self.model = None;
        self.usage = None;
    }

    /// Puts a failed chunk back in the queue. Attempts are kept.
    pub fn reset_for_retry(&mut self) {
        if self.state == ChunkState::Error {
            self.state = ChunkState::Pending;
            self.error = None;
        }
    }
}

/// Rough token estimate: one token per four characters
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

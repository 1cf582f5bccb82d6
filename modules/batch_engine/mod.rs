//! Batch engine for transforming segmented documents
//!
//! This module provides:
//! - Sequential or grouped concurrent dispatch of chunks through the failover policy
//! - Pause, resume and cooperative cancellation
//! - Progress events, run statistics and order-stable output assembly
//! - Markdown run reports

pub mod types;
pub mod control;
pub mod markdown;
pub mod core;

pub use types::{BatchEvent, ChunkStage, EngineError, RunStats};
pub use control::{ControlState, RunControl};
pub use markdown::{MarkdownBuilder, MarkdownFormatter};
pub use self::core::BatchEngine;

//! Text segmenter
//!
//! Splits a long document into ordered chunks sized to a token budget. Consecutive
//! chunks share a slice of text so the model sees some context across the cut, and
//! cuts are nudged forward to the next sentence end or newline when one is close.

pub mod types;
pub mod splitter;

pub use types::*;
pub use splitter::{segment, Segmenter, BOUNDARY_LOOKAHEAD};

#[cfg(test)]
mod tests;

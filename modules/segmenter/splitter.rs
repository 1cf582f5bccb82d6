use super::types::*;
use tracing::debug;

/// How far past a computed boundary we look for a sentence end or newline
pub const BOUNDARY_LOOKAHEAD: usize = 200;

/// Splits source text into ordered, overlapping chunks sized to a token budget
pub struct Segmenter {
    config: SegmentConfig,
}

impl Segmenter {
    /// Create a new segmenter with default configuration
    pub fn new() -> Self {
        Self {
            config: SegmentConfig::default(),
        }
    }

    /// Create a new segmenter with custom configuration
    pub fn with_config(config: SegmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Split the text into chunks. Empty text yields no chunks.
    pub fn segment(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let total_tokens = estimate_tokens(text);

        // Text fits in one chunk
        if total_tokens <= self.config.target_tokens {
            return vec![Chunk::new(0, 0, text.len(), text.to_string())];
        }

        let len = text.len();
        let ratio = len as f64 / total_tokens as f64;
        let chars_per_chunk = ((self.config.target_tokens as f64 * ratio) as usize).max(1);
        let overlap_chars = (self.config.overlap_tokens as f64 * ratio) as usize;

        debug!(
            "Segmenting {} bytes (~{} tokens): {} bytes per chunk, {} bytes overlap",
            len, total_tokens, chars_per_chunk, overlap_chars
        );

        let mut chunks = Vec::new();
        let mut position = 0;

        while position < len {
            let start = floor_char_boundary(text, position.saturating_sub(overlap_chars));
            let raw_end = ceil_char_boundary(text, (position + chars_per_chunk).min(len));

            let end = if raw_end < len {
                snap_to_boundary(text, raw_end)
            } else {
                raw_end
            };

            let sequence = chunks.len();
            chunks.push(Chunk::new(sequence, start, end, text[start..end].to_string()));
            position = end;
        }

        chunks
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Split text with an explicit token budget
pub fn segment(text: &str, target_tokens: usize, overlap_tokens: usize) -> Vec<Chunk> {
    Segmenter::with_config(SegmentConfig {
        target_tokens,
        overlap_tokens,
    })
    .segment(text)
}

/// Move a mid-text boundary forward to the nearest ". " or newline within the lookahead window
fn snap_to_boundary(text: &str, end: usize) -> usize {
    let window_end = ceil_char_boundary(text, (end + BOUNDARY_LOOKAHEAD + 1).min(text.len()));
    let window = &text[end..window_end];

    if let Some(offset) = window.find(". ").filter(|&i| i < BOUNDARY_LOOKAHEAD) {
        return end + offset + 1;
    }
    if let Some(offset) = window.find('\n').filter(|&i| i < BOUNDARY_LOOKAHEAD) {
        return end + offset + 1;
    }
    end
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

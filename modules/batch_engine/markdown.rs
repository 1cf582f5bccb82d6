//! Markdown rendering of run reports

use std::fmt::Write;

use crate::modules::config::BatchConfig;
use crate::modules::segmenter::{Chunk, ChunkState};

use super::types::RunStats;

/// A builder for creating structured markdown documents
pub struct MarkdownBuilder {
    content: String,
}

impl MarkdownBuilder {
    pub fn new() -> Self {
        Self {
            content: String::with_capacity(4096),
        }
    }

    pub fn heading(&mut self, level: u8, text: &str) -> &mut Self {
        let prefix = "#".repeat(level as usize);
        let _ = writeln!(self.content, "{} {}\n", prefix, text);
        self
    }

    pub fn paragraph(&mut self, text: &str) -> &mut Self {
        let _ = writeln!(self.content, "{}\n", text);
        self
    }

    pub fn metadata(&mut self, key: &str, value: &str) -> &mut Self {
        let _ = writeln!(self.content, "**{}:** {}\n", key, value);
        self
    }

    pub fn bullet(&mut self, text: &str) -> &mut Self {
        let _ = writeln!(self.content, "- {}", text);
        self
    }

    pub fn quote(&mut self, text: &str) -> &mut Self {
        for line in text.lines() {
            let _ = writeln!(self.content, "> {}", line);
        }
        self.content.push('\n');
        self
    }

    pub fn horizontal_rule(&mut self) -> &mut Self {
        let _ = writeln!(self.content, "---\n");
        self
    }

    pub fn build(self) -> String {
        self.content
    }
}

impl Default for MarkdownBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MarkdownFormatter;

impl MarkdownFormatter {
    /// Summary of one run: settings, counts, timing, token totals and every failed chunk
    pub fn format_run_report(config: &BatchConfig, stats: &RunStats, chunks: &[Chunk]) -> String {
        let mut builder = MarkdownBuilder::new();

        builder
            .heading(1, "Batch Transformation Report")
            .metadata("Models", &config.model_priority.join(", "))
            .metadata("Dispatch width", &config.dispatch_width().to_string())
            .metadata("Chunk size", &format!("{} tokens ({} overlap)", config.batch_size, config.overlap_size))
            .horizontal_rule();

        builder
            .heading(2, "Progress")
            .bullet(&format!("Total chunks: {}", stats.total))
            .bullet(&format!("Succeeded: {} ({:.1}%)", stats.completed, stats.percentage))
            .bullet(&format!("Failed: {}", stats.failed))
            .bullet(&format!("Pending: {}", stats.pending))
            .bullet(&format!("Elapsed: {}", Self::format_duration(stats.elapsed_ms)))
            .bullet(&format!("Estimated remaining: {}", Self::format_duration(stats.eta_ms)))
            .paragraph("");

        builder
            .heading(2, "Token Usage")
            .metadata("Input", &stats.usage.input_tokens.to_string())
            .metadata("Output", &stats.usage.output_tokens.to_string())
            .metadata("Total", &stats.usage.total_tokens.to_string());

        let mut models: Vec<(&str, usize)> = Vec::new();
        for chunk in chunks.iter().filter(|c| c.state == ChunkState::Success) {
            if let Some(model) = chunk.model.as_deref() {
                match models.iter_mut().find(|(m, _)| *m == model) {
                    Some((_, count)) => *count += 1,
                    None => models.push((model, 1)),
                }
            }
        }
        if !models.is_empty() {
            builder.heading(2, "Models Used");
            for (model, count) in &models {
                builder.bullet(&format!("`{}`: {} chunks", model, count));
            }
            builder.paragraph("");
        }

        let mut failed: Vec<&Chunk> = chunks.iter().filter(|c| c.state == ChunkState::Error).collect();
        failed.sort_by_key(|c| c.sequence);
        if !failed.is_empty() {
            builder.horizontal_rule().heading(2, "Failed Chunks");
            for chunk in failed {
                builder
                    .heading(3, &format!("Chunk {}", chunk.sequence + 1))
                    .metadata("Attempts", &chunk.attempts.to_string())
                    .metadata("Characters", &chunk.text.chars().count().to_string())
                    .quote(chunk.error.as_deref().unwrap_or("unknown error"));
            }
        }

        builder.build()
    }

    fn format_duration(ms: u64) -> String {
        let secs = ms / 1000;
        if secs >= 3600 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}s", secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::generation::{GeneratedText, TokenUsage};

    #[test]
    fn test_builder_output() {
        let mut builder = MarkdownBuilder::new();
        builder.heading(2, "Title").metadata("Key", "value").bullet("item");
        assert_eq!(builder.build(), "## Title\n\n**Key:** value\n\n- item\n");
    }

    #[test]
    fn test_report_lists_failures_in_order() {
        let mut ok = Chunk::new(0, 0, 5, "hello".into());
        ok.mark_processing();
        ok.mark_success(GeneratedText {
            text: "HELLO".into(),
            model: "amazon.nova-lite-v1:0".into(),
            usage: Some(TokenUsage::new(100, 40)),
        });
        let mut late = Chunk::new(2, 10, 15, "later".into());
        late.mark_processing();
        late.mark_error("Rate limit exceeded (429): slow down");
        let mut early = Chunk::new(1, 5, 10, "early".into());
        early.mark_processing();
        early.mark_error("Server error (500): boom");

        let chunks = vec![ok, late, early];
        let stats = RunStats::from_chunks(&chunks, 65_000);
        let report = MarkdownFormatter::format_run_report(&BatchConfig::default(), &stats, &chunks);

        assert!(report.starts_with("# Batch Transformation Report"));
        assert!(report.contains("- Succeeded: 1 (33.3%)"));
        assert!(report.contains("- Elapsed: 1m 5s"));
        assert!(report.contains("**Total:** 140"));
        assert!(report.contains("`amazon.nova-lite-v1:0`: 1 chunks"));
        let chunk_two = report.find("### Chunk 2").unwrap();
        let chunk_three = report.find("### Chunk 3").unwrap();
        assert!(chunk_two < chunk_three);
        assert!(report.contains("> Rate limit exceeded (429): slow down"));
    }

    #[test]
    fn test_report_without_failures_has_no_failure_section() {
        let report = MarkdownFormatter::format_run_report(&BatchConfig::default(), &RunStats::default(), &[]);
        assert!(!report.contains("Failed Chunks"));
        assert!(report.contains("- Total chunks: 0"));
    }
}

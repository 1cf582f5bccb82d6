use super::*;

#[cfg(test)]
mod integration_tests {
    use super::*;

    fn prose(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence number {} talks about something moderately interesting.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_sequence_indices_are_contiguous() {
        let text = prose(2000);
        let chunks = segment(&text, 500, 50);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, i);
        }
    }

    #[test]
    fn test_spans_cover_whole_text_without_gaps() {
        for (target, overlap) in [(100, 0), (100, 10), (500, 50), (1000, 200), (37, 36)] {
            let text = format!("{}\n{}", prose(500), prose(300));
            let chunks = segment(&text, target, overlap);

            assert_eq!(chunks.first().map(|c| c.start), Some(0));
            assert_eq!(chunks.last().map(|c| c.end), Some(text.len()));
            for pair in chunks.windows(2) {
                assert!(pair[1].start <= pair[0].end, "gap between chunk {} and {}", pair[0].sequence, pair[1].sequence);
                assert!(pair[1].end > pair[0].end, "chunk {} does not advance", pair[1].sequence);
            }
            for chunk in &chunks {
                assert_eq!(&text[chunk.start..chunk.end], chunk.text);
            }
        }
    }

    #[test]
    fn test_text_under_budget_is_single_chunk() {
        let text = prose(10);
        let tokens = estimate_tokens(&text);
        let chunks = segment(&text, tokens, 10);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, text.len());
        assert_eq!(chunks[0].token_estimate, tokens);
    }

    #[test]
    fn test_chunks_start_pending_with_unique_ids() {
        let chunks = segment(&prose(800), 200, 20);
        let ids: std::collections::HashSet<_> = chunks.iter().map(|c| c.id.as_str()).collect();

        assert_eq!(ids.len(), chunks.len());
        for chunk in &chunks {
            assert_eq!(chunk.state, ChunkState::Pending);
            assert_eq!(chunk.attempts, 0);
            assert!(chunk.output.is_none());
            assert!(chunk.error.is_none());
        }
    }

    #[test]
    fn test_chunk_sizes_stay_near_target() {
        let text = prose(3000);
        let chunks = segment(&text, 1000, 100);

        // every chunk but the last is at least the raw size and at most one lookahead window longer
        for chunk in &chunks[..chunks.len() - 1] {
            let own_len = chunk.end - chunk.start;
            assert!(own_len >= 3900, "chunk {} too short: {}", chunk.sequence, own_len);
            assert!(own_len <= 4400 + BOUNDARY_LOOKAHEAD + 1, "chunk {} too long: {}", chunk.sequence, own_len);
        }
    }

    #[test]
    fn test_zero_target_still_terminates() {
        let chunks = segment("abc def", 0, 0);
        assert!(!chunks.is_empty());
        assert_eq!(chunks.last().map(|c| c.end), Some(7));
    }
}

//! Text chunking for embeddings.
//!
//! Splits large text into overlapping chunks for embedding generation.
//!
//! # Design Decisions
//!
//! - **Byte budget on char boundaries**: sizes are measured in UTF-8 bytes
//!   and every cut lands on a char boundary.
//! - **Word boundary splitting**: avoids breaking mid-word.
//! - **Overlapping windows**: maintains context at chunk boundaries.
//! - **Deterministic**: the same text and config always produce the same
//!   chunks, so re-processing a subject overwrites rather than duplicates.

use super::types::{EmbeddingSettings, ProviderInfo};

/// Configuration for text chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum bytes per chunk.
    pub max_chars: usize,

    /// Bytes of overlap between consecutive chunks.
    pub overlap: usize,

    /// A word-boundary cut never produces a chunk shorter than this.
    pub min_chunk_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 2000,
            overlap: 200,
            min_chunk_size: 100,
        }
    }
}

impl ChunkConfig {
    /// Chunking sized for a provider, with explicit settings taking precedence.
    #[must_use]
    pub fn for_provider(info: &ProviderInfo, settings: &EmbeddingSettings) -> Self {
        let max_chars = settings
            .chunk_max_chars
            .unwrap_or_else(|| info.max_chars.min(2000))
            .max(1);
        let overlap = settings.chunk_overlap.unwrap_or(max_chars / 10);
        Self {
            max_chars,
            overlap,
            min_chunk_size: (max_chars / 20).max(1),
        }
        .normalized()
    }

    /// Clamp overlap and minimum size so chunking always makes progress.
    #[must_use]
    pub fn normalized(self) -> Self {
        let max_chars = self.max_chars.max(1);
        Self {
            max_chars,
            overlap: self.overlap.min(max_chars / 2),
            min_chunk_size: self.min_chunk_size.clamp(1, max_chars),
        }
    }
}

/// A text chunk with its position in the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    /// Zero-based, contiguous.
    pub index: usize,
    /// Byte offset in the original (untrimmed) text.
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Split text into overlapping chunks.
///
/// Leading and trailing whitespace is ignored; whitespace-only text yields
/// no chunks.
///
/// ```rust
/// use kh::embeddings::chunking::{chunk_text, ChunkConfig};
///
/// let chunks = chunk_text("This is a test.", &ChunkConfig::default());
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "This is a test.");
/// ```
#[must_use]
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<TextChunk> {
    let config = config.clone().normalized();
    let lead = text.len() - text.trim_start().len();
    let body = text.trim();

    if body.is_empty() {
        return vec![];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let mut end = floor_boundary(body, (start + config.max_chars).min(body.len()));
        if end < body.len() {
            let min_end = floor_boundary(body, (start + config.min_chunk_size).min(end));
            end = find_word_boundary(body, min_end, end);
        }
        if end <= start {
            // A single char wider than the budget
            end = ceil_boundary(body, start + 1);
        }

        chunks.push(TextChunk {
            text: body[start..end].to_string(),
            index: chunks.len(),
            start_offset: lead + start,
            end_offset: lead + end,
        });

        if end >= body.len() {
            break;
        }

        let next = floor_boundary(body, end.saturating_sub(config.overlap));
        start = if next > start { next } else { end };
    }

    chunks
}

/// Last word boundary in `text[min_pos..target]`, or `target` if none.
///
/// The boundary character stays in the earlier chunk.
fn find_word_boundary(text: &str, min_pos: usize, target: usize) -> usize {
    text[min_pos..target]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace() || matches!(c, '.' | '!' | '?' | ';' | ','))
        .map_or(target, |(i, c)| min_pos + i + c.len_utf8())
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index.min(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ChunkConfig {
        ChunkConfig {
            max_chars: 50,
            overlap: 10,
            min_chunk_size: 10,
        }
    }

    #[test]
    fn test_single_chunk() {
        let chunks = chunk_text("Hello world", &ChunkConfig::default());

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello world");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_empty_and_whitespace_only() {
        assert!(chunk_text("", &ChunkConfig::default()).is_empty());
        assert!(chunk_text("   \n\t  ", &ChunkConfig::default()).is_empty());
    }

    #[test]
    fn test_offsets_point_into_original_text() {
        let text = "   leading spaces then words";
        let chunks = chunk_text(text, &ChunkConfig::default());
        assert_eq!(&text[chunks[0].start_offset..chunks[0].end_offset], chunks[0].text);
        assert_eq!(chunks[0].start_offset, 3);
    }

    #[test]
    fn test_multiple_chunks() {
        let config = small();
        let text = "The quick brown fox jumps over the lazy dog. This is a test sentence that should be split into multiple chunks.";
        let chunks = chunk_text(text, &config);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.text.len() <= config.max_chars);
            assert_eq!(chunk.index, i);
            assert_eq!(&text[chunk.start_offset..chunk.end_offset], chunk.text);
        }
        assert_eq!(chunks.last().map(|c| c.end_offset), Some(text.len()));
    }

    #[test]
    fn test_overlap() {
        let config = ChunkConfig {
            max_chars: 20,
            overlap: 5,
            min_chunk_size: 5,
        };
        let chunks = chunk_text("one two three four five six seven eight", &config);

        assert!(chunks.len() >= 2);
        assert!(chunks[0].end_offset > chunks[1].start_offset);
    }

    #[test]
    fn test_deterministic() {
        let text = "alpha beta gamma delta ".repeat(40);
        assert_eq!(chunk_text(&text, &small()), chunk_text(&text, &small()));
    }

    #[test]
    fn test_multibyte_text_never_splits_a_char() {
        let text = "héllo wörld ñandú ".repeat(20) + &"字".repeat(60);
        let chunks = chunk_text(&text, &small());
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(text.is_char_boundary(chunk.start_offset));
            assert!(text.is_char_boundary(chunk.end_offset));
        }
    }

    #[test]
    fn test_degenerate_config_still_progresses() {
        let config = ChunkConfig {
            max_chars: 1,
            overlap: 5,
            min_chunk_size: 0,
        };
        let chunks = chunk_text("ab字", &config);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text, "字");
    }
}

//! Splits extracted text into overlapping chunks sized for the embedding
//! model. Overlap keeps a semantic unit that straddles a boundary
//! retrievable from either adjacent chunk.

use crate::config::ChunkingConfig;

/// Splits `text` into ordered chunks of at most `chunk_size` characters,
/// with `chunk_overlap` characters shared between neighbors. Chunk
/// boundaries prefer a sentence end, then a word boundary, as long as the
/// break point lands past the midpoint of the window. Whitespace-only
/// chunks are dropped; the returned position is the chunk ordinal.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let chunk_size = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(chunk_size - 1);

    if chars.len() <= chunk_size {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() && chunks.len() < config.max_chunks_per_document {
        let mut end = (start + chunk_size).min(chars.len());

        if end < chars.len() {
            end = snap_to_boundary(&chars, start, end, chunk_size);
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end == chars.len() {
            break;
        }
        // Overlap with the previous window, but always make progress.
        start = (end.saturating_sub(overlap)).max(start + 1);
    }

    chunks
}

/// Prefers ending a chunk just after a sentence, falling back to a word
/// boundary. Only breaks past the window midpoint so a pathological input
/// cannot shrink chunks to nothing.
fn snap_to_boundary(chars: &[char], start: usize, end: usize, chunk_size: usize) -> usize {
    let midpoint = start + chunk_size / 2;

    if let Some(pos) = rfind_char(chars, start, end, '.') {
        if pos > midpoint {
            return pos + 1;
        }
    }

    if let Some(pos) = rfind_char(chars, start, end, ' ') {
        if pos > midpoint {
            return pos;
        }
    }

    end
}

fn rfind_char(chars: &[char], start: usize, end: usize, needle: char) -> Option<usize> {
    chars[start..end]
        .iter()
        .rposition(|&c| c == needle)
        .map(|pos| start + pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            chunk_overlap,
            max_chunks_per_document: 1000,
        }
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("hello world", &config(1000, 200));
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn whitespace_only_text_yields_no_chunks() {
        assert!(chunk_text("   \n  ", &config(1000, 200)).is_empty());
    }

    #[test]
    fn uniform_text_produces_expected_windows() {
        // 3000 characters with no break points: windows at 0, 800, 1600,
        // 2400, so 4 chunks with 200 characters shared between neighbors.
        let text = "a".repeat(3000);
        let chunks = chunk_text(&text, &config(1000, 200));

        assert_eq!(chunks.len(), 4);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 1000);
        }
        assert_eq!(chunks[0].chars().count(), 1000);
        assert_eq!(chunks[3].chars().count(), 600);

        // Adjacent chunks share the overlap region.
        let tail: String = chunks[0].chars().skip(800).collect();
        let head: String = chunks[1].chars().take(200).collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn prefers_sentence_boundaries() {
        let sentence = "This is a sentence that ends here. ";
        let text = sentence.repeat(50);
        let chunks = chunk_text(&text, &config(200, 40));

        assert!(chunks.len() > 1);
        // Every non-final chunk should end at a sentence break.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with('.'), "chunk ended mid-sentence: {chunk:?}");
        }
    }

    #[test]
    fn respects_max_chunk_cap() {
        let text = "b".repeat(10_000);
        let mut cfg = config(100, 20);
        cfg.max_chunks_per_document = 5;
        assert_eq!(chunk_text(&text, &cfg).len(), 5);
    }

    #[test]
    fn never_loops_on_heavy_overlap() {
        // Overlap equal to chunk size would stall without the progress
        // guard; it gets clamped instead.
        let text = "c".repeat(500);
        let chunks = chunk_text(&text, &config(100, 100));
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 500);
    }
}

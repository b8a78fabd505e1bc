//! Token-budget text chunking.
//!
//! Splits documents on word boundaries into overlapping chunks sized by an
//! approximate token count (the downstream embedding endpoint enforces its
//! own hard limit, so an estimate is enough here).

use std::hash::{DefaultHasher, Hash, Hasher};

/// Default chunk budget in approximate tokens.
pub const DEFAULT_CHUNK_TOKEN_SIZE: usize = 1200;
/// Default overlap between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP_TOKENS: usize = 100;

/// One chunk of a source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Deterministic id derived from the chunk content and order.
    pub id: String,
    /// Id of the document this chunk came from.
    pub doc_id: String,
    /// Position of the chunk within the document.
    pub order: usize,
    pub text: String,
    /// Approximate token count of `text`.
    pub tokens: usize,
}

/// Rough token estimate: four characters per token, minimum one per word.
pub fn approximate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    let words = text.split_whitespace().count();
    std::cmp::max(chars.div_ceil(4), words)
}

/// Deterministic content id, stable across runs.
pub fn content_id(prefix: &str, content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{}-{:016x}", prefix, hasher.finish())
}

/// Chunker with a token budget and overlap.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_tokens: usize,
    overlap_tokens: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_TOKEN_SIZE, DEFAULT_CHUNK_OVERLAP_TOKENS)
    }
}

impl Chunker {
    pub fn new(chunk_tokens: usize, overlap_tokens: usize) -> Self {
        let chunk_tokens = chunk_tokens.max(1);
        Self {
            chunk_tokens,
            overlap_tokens: overlap_tokens.min(chunk_tokens - 1),
        }
    }

    /// Split a document into overlapping chunks.
    pub fn chunk(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        // Per-word token estimates, so chunk boundaries track the budget.
        let word_tokens: Vec<usize> = words
            .iter()
            .map(|w| approximate_tokens(w).max(1))
            .collect();

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < words.len() {
            let mut end = start;
            let mut budget = 0;
            while end < words.len() && budget + word_tokens[end] <= self.chunk_tokens {
                budget += word_tokens[end];
                end += 1;
            }
            // A single word over budget still forms a chunk.
            if end == start {
                budget = word_tokens[start];
                end = start + 1;
            }

            let text = words[start..end].join(" ");
            let order = chunks.len();
            chunks.push(Chunk {
                id: content_id("chunk", &format!("{doc_id}:{order}:{text}")),
                doc_id: doc_id.to_string(),
                order,
                text,
                tokens: budget,
            });

            if end == words.len() {
                break;
            }

            // Step back far enough to cover the overlap budget.
            let mut overlap = 0;
            let mut next_start = end;
            while next_start > start + 1 && overlap < self.overlap_tokens {
                next_start -= 1;
                overlap += word_tokens[next_start];
            }
            start = next_start.max(start + 1);
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approximate_tokens_scales_with_length() {
        assert_eq!(approximate_tokens(""), 0);
        assert_eq!(approximate_tokens("word"), 1);
        assert!(approximate_tokens(&"abcd".repeat(100)) >= 100);
        // A word is never less than one token.
        assert_eq!(approximate_tokens("a b c"), 3);
    }

    #[test]
    fn content_id_is_deterministic() {
        assert_eq!(content_id("doc", "same text"), content_id("doc", "same text"));
        assert_ne!(content_id("doc", "one"), content_id("doc", "two"));
        assert!(content_id("doc", "x").starts_with("doc-"));
    }

    #[test]
    fn short_text_produces_one_chunk() {
        let chunker = Chunker::new(100, 10);
        let chunks = chunker.chunk("doc-1", "a handful of words only");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "a handful of words only");
        assert_eq!(chunks[0].order, 0);
        assert_eq!(chunks[0].doc_id, "doc-1");
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("doc", "").is_empty());
        assert!(chunker.chunk("doc", "  \t\n ").is_empty());
    }

    #[test]
    fn long_text_is_split_with_overlap() {
        let chunker = Chunker::new(10, 3);
        let text = (0..40).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunker.chunk("doc", &text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.tokens <= 10 || chunk.text.split_whitespace().count() == 1);
        }
        // Consecutive chunks share words.
        let first: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let second: Vec<&str> = chunks[1].text.split_whitespace().collect();
        assert!(first.iter().any(|w| second.contains(w)));
    }

    #[test]
    fn chunk_orders_are_sequential() {
        let chunker = Chunker::new(5, 1);
        let text = (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunker.chunk("doc", &text);

        for (expected, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.order, expected);
        }
    }

    #[test]
    fn chunk_ids_differ_between_positions_and_documents() {
        let chunker = Chunker::new(3, 0);
        let text = "alpha beta gamma delta epsilon zeta";
        let a = chunker.chunk("doc-a", text);
        let b = chunker.chunk("doc-b", text);

        assert_ne!(a[0].id, a[1].id);
        assert_ne!(a[0].id, b[0].id);
        // Same document and text: stable ids.
        assert_eq!(a[0].id, chunker.chunk("doc-a", text)[0].id);
    }

    #[test]
    fn oversized_single_word_still_chunks() {
        let chunker = Chunker::new(2, 0);
        let giant = "x".repeat(64);
        let chunks = chunker.chunk("doc", &giant);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, giant);
    }

    #[test]
    fn overlap_is_clamped_below_chunk_size() {
        let chunker = Chunker::new(3, 10);
        let text = (0..12).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        // Must terminate despite overlap >= size.
        let chunks = chunker.chunk("doc", &text);
        assert!(!chunks.is_empty());
        assert_eq!(chunks.last().unwrap().text.contains("w11"), true);
    }
}

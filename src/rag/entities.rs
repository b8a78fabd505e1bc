//! Heuristic entity and relation extraction.
//!
//! No network calls: capitalized words, handles, hashtags and tokens with
//! digits are treated as entity candidates; neighboring entities inside a
//! chunk get a co-occurrence relation.

use std::collections::HashSet;

use super::chunker::Chunk;

/// Entity mention found in a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityMention {
    /// Original surface form.
    pub name: String,
    /// Lowercased normalized form used as the graph node key.
    pub normalized: String,
    /// Chunk the mention was found in.
    pub chunk_id: String,
    /// Word position inside the chunk.
    pub position: usize,
}

/// Relation between two entities (co-occurrence).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRelation {
    pub from: String,
    pub to: String,
    pub relation_type: String,
    pub weight: f32,
}

/// Heuristic extractor with a small multilingual stopword list.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    stopwords: HashSet<String>,
    hint_terms: HashSet<String>,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityExtractor {
    pub fn new() -> Self {
        Self::with_hints(&[])
    }

    /// Extractor that also treats the given terms as entity candidates
    /// regardless of casing. Hints come from the configured entity types,
    /// which include lowercase names like "date" and "platform".
    pub fn with_hints(hints: &[String]) -> Self {
        let mut stopwords = HashSet::new();
        for w in [
            "and", "or", "but", "the", "a", "an", "of", "in", "on", "for", "to", "with", "is",
            "are", "was", "what", "when", "where", "who", "how", "now", "year", "month", "day",
        ] {
            stopwords.insert(w.to_string());
        }
        let hint_terms = hints.iter().map(|h| h.to_lowercase()).collect();
        Self {
            stopwords,
            hint_terms,
        }
    }

    /// Extract entity mentions and their co-occurrence relations.
    pub fn extract(&self, chunk: &Chunk) -> (Vec<EntityMention>, Vec<EntityRelation>) {
        let mut entities = Vec::new();
        let mut seen = HashSet::new();

        for (idx, raw_token) in chunk.text.split_whitespace().enumerate() {
            let token =
                raw_token.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '#');
            if token.chars().count() < 2 {
                continue;
            }
            let normalized = token.to_lowercase();
            if self.stopwords.contains(&normalized) {
                continue;
            }

            let is_candidate = token
                .chars()
                .next()
                .map(|c| c.is_uppercase())
                .unwrap_or(false)
                || token.contains('@')
                || token.contains('#')
                || token.chars().any(|c| c.is_numeric())
                || self.hint_terms.contains(&normalized);

            if !is_candidate {
                continue;
            }

            if seen.insert(normalized.clone()) {
                entities.push(EntityMention {
                    name: token.to_string(),
                    normalized,
                    chunk_id: chunk.id.clone(),
                    position: idx,
                });
            }
        }

        let relations = entities
            .windows(2)
            .map(|pair| EntityRelation {
                from: pair[0].normalized.clone(),
                to: pair[1].normalized.clone(),
                relation_type: "co_occurs".to_string(),
                weight: 1.0,
            })
            .collect();

        (entities, relations)
    }

    /// Normalized entity names found in free text (used for queries).
    pub fn extract_keywords(&self, text: &str) -> Vec<String> {
        let probe = Chunk {
            id: "query".to_string(),
            doc_id: "query".to_string(),
            order: 0,
            text: text.to_string(),
            tokens: 0,
        };
        let (entities, _) = self.extract(&probe);
        let unique: HashSet<String> = entities.into_iter().map(|e| e.normalized).collect();
        let mut keywords: Vec<String> = unique.into_iter().collect();
        keywords.sort();
        keywords
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::chunker::Chunker;

    fn chunk_of(text: &str) -> Chunk {
        Chunker::new(1000, 0).chunk("doc", text).remove(0)
    }

    #[test]
    fn extracts_capitalized_words_handles_and_numbers() {
        let extractor = EntityExtractor::new();
        let chunk = chunk_of("Alice met Bob in Paris with @carol during Q3 2025");

        let (entities, relations) = extractor.extract(&chunk);

        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Alice"));
        assert!(names.contains(&"Bob"));
        assert!(names.contains(&"Paris"));
        assert!(names.iter().any(|n| n.contains("@carol")));
        assert!(names.contains(&"2025"));
        assert!(!relations.is_empty());
    }

    #[test]
    fn skips_stopwords_and_lowercase_words() {
        let extractor = EntityExtractor::new();
        let chunk = chunk_of("What is the integrity of simple plain words");

        let (entities, _) = extractor.extract(&chunk);
        assert!(entities.is_empty());
    }

    #[test]
    fn dedupes_repeated_mentions_within_a_chunk() {
        let extractor = EntityExtractor::new();
        let chunk = chunk_of("Alice saw Alice and ALICE again");

        let (entities, _) = extractor.extract(&chunk);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].normalized, "alice");
    }

    #[test]
    fn relations_link_neighboring_entities() {
        let extractor = EntityExtractor::new();
        let chunk = chunk_of("Acme hired Bob before Carol joined");

        let (entities, relations) = extractor.extract(&chunk);
        assert_eq!(entities.len(), 3);
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0].from, "acme");
        assert_eq!(relations[0].to, "bob");
        assert_eq!(relations[0].relation_type, "co_occurs");
    }

    #[test]
    fn extract_keywords_returns_sorted_unique_normals() {
        let extractor = EntityExtractor::new();
        let keywords =
            extractor.extract_keywords("What is the Integrity at 11? now: 2025 year");

        assert!(keywords.contains(&"integrity".to_string()));
        assert!(keywords.contains(&"11".to_string()));
        assert!(keywords.contains(&"2025".to_string()));
        let mut sorted = keywords.clone();
        sorted.sort();
        assert_eq!(keywords, sorted);
    }

    #[test]
    fn hint_terms_are_candidates_regardless_of_casing() {
        let chunk = chunk_of("the platform launched on that date");

        let plain = EntityExtractor::new();
        assert!(plain.extract(&chunk).0.is_empty());

        let hinted =
            EntityExtractor::with_hints(&["platform".to_string(), "date".to_string()]);
        let (entities, _) = hinted.extract(&chunk);
        let names: Vec<&str> = entities.iter().map(|e| e.normalized.as_str()).collect();
        assert_eq!(names, ["platform", "date"]);
    }

    #[test]
    fn mentions_carry_chunk_id_and_position() {
        let extractor = EntityExtractor::new();
        let chunk = chunk_of("plain words then Entity");

        let (entities, _) = extractor.extract(&chunk);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].chunk_id, chunk.id);
        assert_eq!(entities[0].position, 3);
    }
}

//! Rule-based entity extraction.
//!
//! Cascade, highest confidence first:
//! 1. URLs, emails and file paths (regex)
//! 2. Backtick and double-quoted terms
//! 3. People behind honorifics, organisations by legal suffix
//! 4. CamelCase identifiers
//! 5. Title Case phrases (two or more words, not at sentence start)
//! 6. Acronyms (2-5 uppercase letters)
//!
//! Relations come from entities that co-occur in a sentence; the words
//! between them pick the label (`uses`, `depends_on`, ...), falling back to
//! `relates_to`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::{EntityExtractor, ExtractedEntity, ExtractedRelation, Extraction};
use crate::error::Result;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>()"'`]+"#).expect("static regex"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("static regex")
});

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s(`'\x22])((?:\.{0,2}/)?(?:[\w.-]+/)+[\w.-]+\.[A-Za-z0-9]{1,8}|[\w-]+\.(?:rs|py|ts|tsx|js|go|java|md|toml|json|yaml|yml|sql|sh|c|h|cpp))\b")
        .expect("static regex")
});

static BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]{2,64})`").expect("static regex"));

static DQUOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\n]{2,64})""#).expect("static regex"));

static PERSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:Mr|Mrs|Ms|Dr|Prof)\.?\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)")
        .expect("static regex")
});

static ORG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:[A-Z][\w&-]*\s+){0,3}[A-Z][\w&-]*)\s+(?:Inc|Corp|Corporation|Ltd|LLC|GmbH|Labs|Foundation)\b\.?")
        .expect("static regex")
});

/// Keyword patterns between two mentions and the relation label they produce.
const RELATION_KEYWORDS: &[(&str, &str)] = &[
    ("works at", "works_at"),
    ("works for", "works_at"),
    ("depends on", "depends_on"),
    ("implements", "implements"),
    ("extends", "extends"),
    ("requires", "requires"),
    ("replaces", "replaces"),
    ("calls", "calls"),
    ("uses", "uses"),
    ("owns", "owns"),
];

/// Mentions further apart than this in one sentence are not linked.
const MAX_RELATION_GAP: usize = 120;

/// Regex and keyword heuristics; never fails, never touches the network.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedExtractor;

impl RuleBasedExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core, also used directly by tests.
    #[must_use]
    pub fn extract_sync(&self, text: &str) -> Extraction {
        let mut collector = Collector::default();

        for m in URL_RE.find_iter(text) {
            let url = m.as_str().trim_end_matches(['.', ',', ';', ':']);
            collector.add("URL", url, 0.95, m.start());
        }
        for m in EMAIL_RE.find_iter(text) {
            collector.add("EMAIL", m.as_str(), 0.95, m.start());
        }
        for cap in PATH_RE.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                if !collector.inside_url(m.start()) {
                    collector.add("FILE", m.as_str(), 0.9, m.start());
                }
            }
        }
        for cap in BACKTICK_RE.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                collector.add("TERM", m.as_str(), 0.8, m.start());
            }
        }
        for cap in DQUOTE_RE.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                if m.as_str().split_whitespace().count() <= 4 {
                    collector.add("TERM", m.as_str(), 0.7, m.start());
                }
            }
        }
        for cap in PERSON_RE.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                collector.add("PERSON", m.as_str(), 0.75, m.start());
            }
        }
        for cap in ORG_RE.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                collector.add("ORG", m.as_str(), 0.75, m.start());
            }
        }

        for (offset, token) in tokens(text) {
            if is_camel_case(token) {
                collector.add("IDENTIFIER", token, 0.7, offset);
            }
        }

        for (offset, phrase) in title_case_phrases(text) {
            collector.add("CONCEPT", &phrase, 0.5, offset);
        }

        for (offset, token) in tokens(text) {
            if (2..=5).contains(&token.len()) && token.chars().all(|c| c.is_ascii_uppercase()) {
                collector.add("ACRONYM", token, 0.6, offset);
            }
        }

        let relations = collector.relations(text);
        Extraction {
            entities: collector.entities,
            relations,
        }
    }
}

impl EntityExtractor for RuleBasedExtractor {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn extract(&self, text: &str) -> Result<Extraction> {
        Ok(self.extract_sync(text))
    }
}

#[derive(Default)]
struct Collector {
    entities: Vec<ExtractedEntity>,
    /// Byte offset of the first mention, parallel to `entities`.
    offsets: Vec<usize>,
    seen: HashSet<String>,
    url_spans: Vec<(usize, usize)>,
}

impl Collector {
    /// First extractor to claim a lowercase surface form wins.
    fn add(&mut self, entity_type: &str, surface: &str, confidence: f64, offset: usize) {
        let surface = surface.trim();
        if surface.chars().count() < 2 || !self.seen.insert(surface.to_lowercase()) {
            return;
        }
        if entity_type == "URL" {
            self.url_spans.push((offset, offset + surface.len()));
        }
        self.entities
            .push(ExtractedEntity::new(entity_type, surface, confidence));
        self.offsets.push(offset);
    }

    fn inside_url(&self, offset: usize) -> bool {
        self.url_spans
            .iter()
            .any(|(start, end)| (*start..*end).contains(&offset))
    }

    /// Link consecutive mentions within each sentence.
    fn relations(&self, text: &str) -> Vec<ExtractedRelation> {
        let mut mentions: Vec<(usize, usize)> = self
            .offsets
            .iter()
            .copied()
            .enumerate()
            .map(|(idx, offset)| (offset, idx))
            .collect();
        mentions.sort_unstable();

        let mut relations = Vec::new();
        for pair in mentions.windows(2) {
            let (a_off, a_idx) = pair[0];
            let (b_off, b_idx) = pair[1];
            let a = &self.entities[a_idx];
            let b = &self.entities[b_idx];

            let a_end = a_off + a.name.len();
            if b_off < a_end || b_off - a_end > MAX_RELATION_GAP {
                continue;
            }
            let Some(between) = text.get(a_end..b_off) else {
                continue;
            };
            if between.contains(['.', '!', '?', '\n']) {
                continue;
            }

            let (label, confidence) = detect_relation_label(between);
            relations.push(ExtractedRelation {
                source: a.name.clone(),
                target: b.name.clone(),
                relationship_type: label.to_string(),
                confidence,
            });
        }
        relations
    }
}

fn detect_relation_label(between: &str) -> (&'static str, f64) {
    let lower = between.to_lowercase();
    for (keyword, label) in RELATION_KEYWORDS {
        if lower.contains(keyword) {
            return (label, 0.6);
        }
    }
    if lower.contains(" is a ") || lower.contains(" is an ") {
        return ("instance_of", 0.5);
    }
    ("relates_to", 0.3)
}

/// Whitespace tokens trimmed of surrounding punctuation, with byte offsets.
fn tokens(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split_whitespace().filter_map(move |raw| {
        let trimmed = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
        if trimmed.is_empty() {
            return None;
        }
        // split_whitespace yields subslices of `text`
        let base = raw.as_ptr() as usize - text.as_ptr() as usize;
        let lead = raw.find(trimmed).unwrap_or(0);
        Some((base + lead, trimmed))
    })
}

/// Identifier with an internal uppercase letter (`VectorStore`, `tokio_Runtime`).
fn is_camel_case(token: &str) -> bool {
    let mut chars = token.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    token.chars().count() >= 3
        && first.is_alphabetic()
        && token.chars().all(|c| c.is_alphanumeric() || c == '_')
        && token.chars().any(char::is_lowercase)
        && chars.any(char::is_uppercase)
}

/// Runs of two or more Title Case words, skipping sentence starts.
fn title_case_phrases(text: &str) -> Vec<(usize, String)> {
    let words: Vec<(usize, &str, bool)> = {
        let mut prev_ends_sentence = true;
        text.split_whitespace()
            .map(|raw| {
                let base = raw.as_ptr() as usize - text.as_ptr() as usize;
                let at_start = prev_ends_sentence;
                prev_ends_sentence = raw.ends_with(['.', '!', '?', ':']);
                (base, raw, at_start)
            })
            .collect()
    };

    let is_title = |raw: &str| {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        let mut chars = word.chars();
        chars.next().is_some_and(char::is_uppercase) && chars.all(char::is_lowercase)
    };

    let mut phrases = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let (offset, raw, at_start) = words[i];
        if !is_title(raw) || at_start {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        // A word ending in punctuation closes the phrase
        let mut open = !raw.ends_with(|c: char| !c.is_alphanumeric());
        while open && j < words.len() && is_title(words[j].1) && !words[j].2 {
            open = !words[j].1.ends_with(|c: char| !c.is_alphanumeric());
            j += 1;
        }
        if j - i >= 2 {
            let phrase = words[i..j]
                .iter()
                .map(|(_, w, _)| w.trim_matches(|c: char| !c.is_alphanumeric()))
                .collect::<Vec<_>>()
                .join(" ");
            let lead = raw.find(|c: char| c.is_alphanumeric()).unwrap_or(0);
            phrases.push((offset + lead, phrase));
        }
        i = j;
    }
    phrases
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(extraction: &Extraction, entity_type: &str) -> Vec<String> {
        extraction
            .entities
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| e.name.clone())
            .collect()
    }

    #[test]
    fn test_structured_references() {
        let extraction = RuleBasedExtractor::new().extract_sync(
            "See https://docs.rs/tokio/latest. Edited src/storage/queue.rs and mailed ops@example.com",
        );
        assert_eq!(names(&extraction, "URL"), vec!["https://docs.rs/tokio/latest"]);
        assert_eq!(names(&extraction, "FILE"), vec!["src/storage/queue.rs"]);
        assert_eq!(names(&extraction, "EMAIL"), vec!["ops@example.com"]);
    }

    #[test]
    fn test_people_orgs_and_identifiers() {
        let extraction = RuleBasedExtractor::new()
            .extract_sync("Yesterday Dr. Alice Smith joined Acme Corp to work on the VectorStore trait.");
        assert_eq!(names(&extraction, "PERSON"), vec!["Alice Smith"]);
        assert_eq!(names(&extraction, "ORG"), vec!["Acme"]);
        assert_eq!(names(&extraction, "IDENTIFIER"), vec!["VectorStore"]);
    }

    #[test]
    fn test_title_case_skips_sentence_start() {
        let phrases = title_case_phrases("Then we met the Knowledge Hub Team. Great Work overall");
        let texts: Vec<_> = phrases.into_iter().map(|(_, p)| p).collect();
        assert_eq!(texts, vec!["Knowledge Hub Team"]);
    }

    #[test]
    fn test_acronyms_and_terms() {
        let extraction =
            RuleBasedExtractor::new().extract_sync("the `claim_next` path talks to SQLite over WAL and the \"retry budget\"");
        assert_eq!(names(&extraction, "TERM"), vec!["claim_next", "retry budget"]);
        assert_eq!(names(&extraction, "ACRONYM"), vec!["WAL"]);
        assert_eq!(names(&extraction, "IDENTIFIER"), vec!["SQLite"]);
    }

    #[test]
    fn test_relation_labels_from_keywords() {
        let extraction =
            RuleBasedExtractor::new().extract_sync("the `ingestion` module depends on `storage` for claims");
        assert_eq!(extraction.relations.len(), 1);
        let rel = &extraction.relations[0];
        assert_eq!(rel.source, "ingestion");
        assert_eq!(rel.target, "storage");
        assert_eq!(rel.relationship_type, "depends_on");
    }

    #[test]
    fn test_no_relation_across_sentences() {
        let extraction = RuleBasedExtractor::new().extract_sync("We use `tokio`. Later `rusqlite` arrived.");
        assert!(extraction.relations.is_empty());
    }

    #[test]
    fn test_deterministic_and_empty() {
        let text = "The `Pipeline` uses `VectorStore` heavily.";
        let extractor = RuleBasedExtractor::new();
        assert_eq!(extractor.extract_sync(text), extractor.extract_sync(text));
        assert_eq!(extractor.extract_sync("   "), Extraction::default());
    }
}

//! Content-quality scoring for synthesis context assembly.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Sections scoring below this are dropped from synthesis context.
pub const CONTENT_QUALITY_THRESHOLD: f32 = 0.3;

/// Sections under this many words are stubs and score zero outright.
const STUB_WORD_CUTOFF: usize = 20;

pub static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "what", "who", "how", "why", "when", "where", "which", "does", "is", "are", "was",
        "were", "the", "a", "an", "of", "in", "on", "to", "for", "and", "or", "not", "can",
        "could", "would", "should", "do", "did", "has", "have", "had", "be", "been", "about",
        "between", "from", "with", "this", "that", "these", "those", "it", "its", "tell", "me",
        "us", "find", "explain", "describe", "relationship", "related", "knowledge", "graph",
        "article", "articles",
    ])
});

/// Score a section's usefulness for answering a question, in [0, 1].
///
/// Stubs under 20 words score 0.0. Longer sections earn a length score
/// capped at 0.8 plus a keyword-overlap bonus over the stop-word-filtered
/// question terms.
pub fn score_section_quality(content: &str, question: &str) -> f32 {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.len() < STUB_WORD_CUTOFF {
        return 0.0;
    }

    let length_score = (0.2 + (words.len() as f32 / 200.0) * 0.6).min(0.8);

    let question_terms: HashSet<String> = question
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w.as_str()))
        .collect();

    let keyword_score = if question_terms.is_empty() {
        0.0
    } else {
        let section_terms: HashSet<String> = words
            .iter()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .collect();
        let overlap = question_terms
            .iter()
            .filter(|t| section_terms.contains(*t))
            .count();
        overlap as f32 / question_terms.len().max(1) as f32
    };

    (length_score + keyword_score * 0.2).clamp(0.0, 1.0)
}

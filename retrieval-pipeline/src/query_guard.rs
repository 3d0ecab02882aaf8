//! Read-only validation for LLM-generated store queries.
//!
//! Only queries generated by the language model pass through here; the
//! system's own hand-written statements never do. The guard rejects by
//! default: a query must start with the store's read verb after string
//! literals and comments are stripped, must contain no write or DDL
//! keyword, and may only use bounded recursive traversals.

use std::sync::LazyLock;

use common::error::AppError;
use regex::Regex;
use tracing::warn;

static SINGLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'[^']*'").expect("valid literal pattern"));

static DOUBLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*""#).expect("valid literal pattern"));

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(--|//).*$").expect("valid comment pattern"));

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment pattern"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

// Recursive traversal depth specifiers without an upper bound: `{..}`,
// `{2..}`, `{..}` with spaces. Bounded forms like `{1..3}` are allowed.
static UNBOUNDED_RECURSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\s*\d*\s*\.\.\s*\}").expect("valid recursion pattern"));

/// Write and DDL keywords that must never appear in a generated query,
/// regardless of position. Checked against the literal-stripped text.
const BLOCKED_KEYWORDS: &[&str] = &[
    "CREATE ", "DELETE ", "UPDATE ", "UPSERT ", "INSERT ", "RELATE ", "REMOVE ", "DEFINE ",
    "ALTER ", "LET ", "BEGIN ", "COMMIT ", "CANCEL ", "KILL ", "LIVE ", "USE ", "INFO ",
];

/// Validate an LLM-generated query before execution. Violations are
/// security errors; the raw query is logged here, never echoed to callers.
pub fn validate_query(query: &str) -> Result<(), AppError> {
    // Strip literals and comments first so keywords inside strings
    // cannot trip the blocklist and keywords cannot hide in strings
    let stripped = SINGLE_QUOTED.replace_all(query, "''");
    let stripped = DOUBLE_QUOTED.replace_all(&stripped, "\"\"");
    let stripped = LINE_COMMENT.replace_all(&stripped, "");
    let stripped = BLOCK_COMMENT.replace_all(&stripped, "");
    let normalized = WHITESPACE
        .replace_all(&stripped, " ")
        .to_uppercase()
        .trim()
        .to_string();

    if !normalized.starts_with("SELECT ") {
        warn!(query, "Rejected generated query: not a SELECT");
        return Err(AppError::Security(
            "Query rejected: must start with SELECT".to_string(),
        ));
    }

    for keyword in BLOCKED_KEYWORDS.iter().copied() {
        if normalized.contains(keyword) {
            warn!(query, keyword, "Rejected generated query: write keyword");
            return Err(AppError::Security(format!(
                "Write operation rejected: query contains {}",
                keyword.trim()
            )));
        }
    }

    if UNBOUNDED_RECURSION.is_match(&stripped) {
        warn!(query, "Rejected generated query: unbounded recursion");
        return Err(AppError::Security(
            "Unbounded recursive traversal rejected: use {1..N} with an upper bound".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_select() {
        validate_query("SELECT title FROM article LIMIT 10").expect("allowed");
        validate_query("select title, category from article where word_count > 0")
            .expect("allowed");
    }

    #[test]
    fn test_accepts_bounded_recursion() {
        validate_query("SELECT @.{1..3}(->links_to->article) AS related FROM article LIMIT 5")
            .expect("allowed");
    }

    #[test]
    fn test_rejects_non_select_start() {
        assert!(validate_query("RELATE a->links_to->b").is_err());
        assert!(validate_query("DELETE article").is_err());
        assert!(validate_query("INFO FOR DB").is_err());
    }

    #[test]
    fn test_rejects_embedded_write_keywords() {
        assert!(validate_query("SELECT * FROM article; DELETE article").is_err());
        assert!(validate_query("SELECT * FROM article WHERE true UPDATE article SET x = 1").is_err());
        assert!(validate_query("SELECT * FROM (CREATE article)").is_err());
    }

    #[test]
    fn test_write_keyword_inside_string_literal_is_fine() {
        validate_query("SELECT * FROM article WHERE title = 'DELETE ME' LIMIT 3")
            .expect("allowed");
        validate_query(r#"SELECT * FROM article WHERE title = "UPDATE log" LIMIT 3"#)
            .expect("allowed");
    }

    #[test]
    fn test_keyword_hidden_by_comment_stripping_still_caught() {
        assert!(validate_query("SELECT * FROM article;\nDELETE /* sneaky */ article").is_err());
    }

    #[test]
    fn test_rejects_unbounded_recursion() {
        assert!(validate_query("SELECT @.{..}(->links_to->article) FROM article").is_err());
        assert!(validate_query("SELECT @.{2..}(->links_to->article) FROM article").is_err());
    }

    #[test]
    fn test_rejected_error_is_security_kind() {
        let err = validate_query("DELETE article").expect_err("rejected");
        assert!(matches!(err, AppError::Security(_)));
    }
}

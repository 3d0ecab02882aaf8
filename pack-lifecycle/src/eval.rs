//! Eval question sets: line-delimited JSON under `eval/questions.jsonl`.

use std::path::Path;

use common::error::AppError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalQuestion {
    pub id: String,
    pub question: String,
    pub ground_truth: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub difficulty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub category: Option<String>,
}

/// Parse JSONL content: one question object per non-empty line.
pub fn parse_eval_questions(content: &str) -> Result<Vec<EvalQuestion>, AppError> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| AppError::Validation(format!("Bad eval question line: {e}")))
        })
        .collect()
}

pub fn load_eval_questions(path: &Path) -> Result<Vec<EvalQuestion>, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::NotFound(format!("Eval questions {}: {e}", path.display())))?;
    parse_eval_questions(&content)
}

//! Seed URL lists (`urls.txt`): line-oriented, `#` comments, blank lines
//! ignored.

use std::path::Path;

use common::error::AppError;

/// Parse a URL list. Every non-blank, non-comment line must be an
/// HTTP(S) URL.
pub fn parse_url_list(content: &str) -> Result<Vec<String>, AppError> {
    let mut urls = Vec::new();

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.starts_with("http://") && !line.starts_with("https://") {
            return Err(AppError::Validation(format!(
                "Line {}: not an HTTP(S) URL: {line}",
                number + 1
            )));
        }
        urls.push(line.to_string());
    }

    Ok(urls)
}

pub fn load_url_list(path: &Path) -> Result<Vec<String>, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::NotFound(format!("URL list {}: {e}", path.display())))?;
    parse_url_list(&content)
}

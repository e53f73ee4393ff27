//! Scrapers for file and commit references in free text.
//!
//! Agent and LLM replies mention files and commits in prose, code fences or
//! quotes. These helpers only extract candidates; callers decide whether a
//! candidate exists on disk or in the repository.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static SHA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-f]{40}\b").expect("sha regex"));

static LINE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(:\d+)+$").expect("line suffix regex"));

const LEADING_TRIM: &[char] = &['(', '[', '{', '<', '*', ',', ';', ':'];
const TRAILING_TRIM: &[char] = &[
    ',', '.', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '<', '>', '*',
];

/// Full 40-hex commit ids in order of first appearance.
pub fn commit_shas(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    SHA_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|sha| seen.insert(sha.clone()))
        .collect()
}

/// Split text into quoted substrings and whitespace-separated words.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in text.chars() {
        match quote {
            Some(q) if ch == q => {
                tokens.push(std::mem::take(&mut current));
                quote = None;
            }
            Some(_) => current.push(ch),
            // Quotes only open at a word start, so apostrophes stay literal.
            None if current.is_empty() && matches!(ch, '"' | '\'' | '`') => {
                quote = Some(ch);
            }
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens.retain(|t| !t.trim().is_empty());
    tokens
}

/// Relative paths mentioned in `text` that live under one of `roots`.
///
/// With no roots configured, any relative token that looks like a path is a
/// candidate. Results are deduplicated in order of first appearance.
pub fn file_references(text: &str, roots: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .iter()
        .filter_map(|token| normalize_path_token(token))
        .filter(|path| {
            roots.is_empty()
                || roots.iter().any(|root| {
                    let root = root.trim_end_matches('/');
                    root.is_empty() || root == "." || path.starts_with(&format!("{root}/"))
                })
        })
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

fn normalize_path_token(token: &str) -> Option<String> {
    let trimmed = token
        .trim()
        .trim_start_matches(LEADING_TRIM)
        .trim_end_matches(TRAILING_TRIM);
    let trimmed = LINE_SUFFIX_RE.replace(trimmed, "");
    let path = trimmed.trim_start_matches("./");
    if path.is_empty() || path.contains("://") || path.starts_with('/') || path.contains("..") {
        return None;
    }
    if path.chars().any(char::is_whitespace) {
        return None;
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let has_extension = file_name
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| {
            !stem.is_empty() && !ext.is_empty() && ext.chars().all(char::is_alphanumeric)
        });
    if path.contains('/') || has_extension {
        Some(path.to_string())
    } else {
        None
    }
}

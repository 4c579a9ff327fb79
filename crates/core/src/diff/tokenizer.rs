//! Splits content into comparable tokens.

use crate::models::{DiffOptions, Granularity, Token};

/// Stateless tokenizer.
pub struct Tokenizer;

impl Tokenizer {
    /// Split `content` into tokens at the configured granularity.
    ///
    /// Token text always preserves the input; whitespace and case
    /// normalization only affect the comparison key.
    pub fn tokenize(content: &str, options: &DiffOptions) -> Vec<Token> {
        let pieces: Vec<&str> = match options.granularity {
            Granularity::Line => content.lines().collect(),
            Granularity::Word => split_words(content),
            Granularity::Character => content
                .char_indices()
                .map(|(i, c)| &content[i..i + c.len_utf8()])
                .collect(),
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(position, text)| Token {
                text: text.to_string(),
                normalized: normalize(text, options),
                position,
            })
            .collect()
    }

    /// Token texts only.
    pub fn texts(tokens: &[Token]) -> Vec<String> {
        tokens.iter().map(|t| t.text.clone()).collect()
    }
}

/// Split on whitespace runs, attaching each run to the word before it.
/// Leading whitespace becomes a token of its own, so concatenating the
/// pieces reproduces the input exactly.
fn split_words(content: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_space = false;

    for (i, c) in content.char_indices() {
        let is_space = c.is_whitespace();
        if in_space && !is_space && i > start {
            pieces.push(&content[start..i]);
            start = i;
        }
        in_space = is_space;
    }
    if start < content.len() {
        pieces.push(&content[start..]);
    }
    pieces
}

fn normalize(text: &str, options: &DiffOptions) -> Option<String> {
    if !options.normalizes() {
        return None;
    }
    let trimmed = if options.ignore_whitespace {
        text.trim()
    } else {
        text
    };
    let key = if options.ignore_case {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    };
    if key == text {
        None
    } else {
        Some(key)
    }
}

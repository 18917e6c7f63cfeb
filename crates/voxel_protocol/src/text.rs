//! Helpers for the fixed-width text fields.

use crate::packet::STRING_LEN;

/// Replaces anything the wire cannot carry (non-ASCII, control characters) with `?`.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

/// Splits `text` into chunks of at most `width` characters.
///
/// Chunks are cut at fixed character offsets so that concatenating them
/// (before trimming) gives back the input; each chunk is then trimmed and
/// chunks left empty by trimming are dropped.
pub fn chunk_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(width)
        .map(|chunk| chunk.iter().collect::<String>().trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

/// [`chunk_text`] at the width of a chat message field.
pub fn chat_chunks(text: &str) -> Vec<String> {
    chunk_text(text, STRING_LEN)
}

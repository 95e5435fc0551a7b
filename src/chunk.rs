//! Recursive character text splitter.
//!
//! Page text is split on the first separator that occurs in it (`"\n\n"`,
//! then `"\n"`, then `" "`, then individual characters). Pieces shorter than
//! `chunk_size` are merged greedily into windows; pieces that are still too
//! long are split again with the next separator. Separators stay attached to
//! the start of the piece that follows them, and windows carry trailing
//! pieces forward so consecutive chunks overlap by up to `chunk_overlap`
//! characters. All lengths are in characters.
//!
//! Each page is chunked on its own so a chunk never spans pages. Chunk ids
//! are derived from `(contract_id, page_number, start_index)`, which makes
//! re-chunking the same contract produce the same ids.

use std::collections::VecDeque;

use tracing::warn;

use crate::error::{ContractError, Result};
use crate::extract::PageContent;
use crate::models::ContractChunk;
use crate::text::sha256_hex;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ContractError::Validation(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap > chunk_size {
            return Err(ContractError::Validation(format!(
                "chunk overlap ({}) is larger than chunk size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    /// Split and report the character offset of every chunk in `text`.
    ///
    /// The search for each chunk starts at the previous chunk's end minus
    /// the overlap, so repeated passages resolve to the right occurrence.
    /// A chunk that cannot be located keeps the search position as its
    /// offset and is logged.
    pub fn split_with_offsets(&self, text: &str) -> Vec<(usize, String)> {
        let mut index = 0usize;
        let mut previous_len = 0usize;
        self.split_text(text)
            .into_iter()
            .map(|chunk| {
                let from = (index + previous_len).saturating_sub(self.chunk_overlap);
                index = match locate(text, &chunk, from) {
                    Some(found) => found,
                    None => {
                        warn!(
                            offset = from,
                            chunk_chars = char_len(&chunk),
                            "chunk not found in page text; using search position as offset"
                        );
                        from
                    }
                };
                previous_len = char_len(&chunk);
                (index, chunk)
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators[separators.len() - 1];
        let mut remaining: &[&str] = &[];
        for (i, s) in separators.iter().enumerate() {
            if s.is_empty() {
                separator = s;
                break;
            }
            if text.contains(s) {
                separator = s;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut good: Vec<&str> = Vec::new();
        for piece in split_keep_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                chunks.extend(self.merge(&good));
                good.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }
        if !good.is_empty() {
            chunks.extend(self.merge(&good));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                if let Some(doc) = join_trimmed(&current) {
                    docs.push(doc);
                }
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }

        if let Some(doc) = join_trimmed(&current) {
            docs.push(doc);
        }
        docs
    }
}

/// Split `text` on `separator`, attaching each separator to the piece after
/// it. An empty separator splits into characters. Empty pieces are dropped.
fn split_keep_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        pieces.push(&text[start..idx]);
        start = idx;
    }
    pieces.push(&text[start..]);
    pieces.into_iter().filter(|p| !p.is_empty()).collect()
}

fn join_trimmed(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Char offset of `needle` in `haystack`, searching from char offset `from`.
fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let byte_from = haystack
        .char_indices()
        .nth(from)
        .map(|(i, _)| i)
        .unwrap_or(haystack.len());
    haystack[byte_from..]
        .find(needle)
        .map(|byte_idx| from + char_len(&haystack[byte_from..byte_from + byte_idx]))
}

/// Find `chunk` at or after `from`, then anywhere in `text`.
fn locate(text: &str, chunk: &str, from: usize) -> Option<usize> {
    find_from(text, chunk, from).or_else(|| find_from(text, chunk, 0))
}

/// Deterministic chunk identifier.
pub fn chunk_id(contract_id: &str, page_number: usize, start_index: usize) -> String {
    sha256_hex(&format!("{}:{}:{}", contract_id, page_number, start_index))
}

/// Chunk every page of a contract.
pub fn chunk_document(
    pages: &[PageContent],
    contract_id: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<ContractChunk>> {
    let splitter = RecursiveSplitter::new(chunk_size, chunk_overlap)?;

    let mut chunks = Vec::new();
    for page in pages {
        if page.text.trim().is_empty() {
            continue;
        }
        for (start_index, text) in splitter.split_with_offsets(&page.text) {
            chunks.push(ContractChunk {
                chunk_id: chunk_id(contract_id, page.page_number, start_index),
                contract_id: contract_id.to_string(),
                page_number: page.page_number,
                section: page.section.clone(),
                start_index,
                text,
            });
        }
    }
    Ok(chunks)
}

//! Turns a local artifact into index units with stable identifiers.
//!
//! Unstructured filing text is split into overlapping passages on paragraph
//! boundaries. Structured JSON payloads become one unit per record (an array
//! yields one unit per element, an object yields one unit), rendered as
//! `key: value` lines under a `"{TICKER} {label}"` header.
//!
//! # Stable identifiers
//!
//! ```text
//! AAPL:price:0000:3f9a1c0b7e42
//! ─┬── ──┬── ─┬── ─────┬──────
//!  │     │    │        └─ first 12 hex chars of SHA-256(normalized text)
//!  │     │    └─ unit position within the component
//!  │     └─ component name
//!  └─ ticker
//! ```
//!
//! The hash covers whitespace-normalized text, so reformatting that only
//! moves whitespace keeps every id; any other change yields a new id and the
//! old one is reconciled away.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::{Component, IndexUnit};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Hex chars of the content hash kept in a unit id.
const ID_HASH_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    /// Units beyond this many are dropped.
    pub max_units: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_tokens: 200,
            overlap_tokens: 25,
            max_units: 50,
        }
    }
}

impl ChunkingParams {
    fn max_chars(&self) -> usize {
        (self.max_tokens * CHARS_PER_TOKEN).max(1)
    }

    fn overlap_chars(&self) -> usize {
        (self.overlap_tokens * CHARS_PER_TOKEN).min(self.max_chars() / 2)
    }
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 (hex) of the whitespace-normalized text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_whitespace(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic id for a unit: a pure function of its inputs.
pub fn stable_unit_id(ticker: &str, component: Component, position: u32, hash: &str) -> String {
    let short = &hash[..hash.len().min(ID_HASH_LEN)];
    format!("{}:{}:{:04}:{}", ticker, component.as_str(), position, short)
}

/// Derive the full unit set for one artifact body.
///
/// Positions are contiguous from 0. Units whose text is blank are skipped
/// before numbering, and at most `params.max_units` units are returned.
pub fn build_units(
    ticker: &str,
    component: Component,
    body: &str,
    params: &ChunkingParams,
) -> Vec<IndexUnit> {
    let texts = if component.is_structured() {
        structured_texts(ticker, component, body, params)
    } else {
        split_passages(body, params)
    };

    texts
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .take(params.max_units)
        .enumerate()
        .map(|(i, text)| {
            let position = i as u32;
            let hash = content_hash(&text);
            IndexUnit {
                id: stable_unit_id(ticker, component, position, &hash),
                ticker: ticker.to_string(),
                component,
                position,
                text,
                hash,
            }
        })
        .collect()
}

/// Split prose into passages on paragraph boundaries.
///
/// Paragraphs (`\n\n`) accumulate until the next one would push the buffer
/// past the size limit; the flushed passage's tail (about `overlap_tokens`
/// worth, starting on a word) seeds the next buffer. A paragraph that alone
/// exceeds the limit is hard-split on whitespace with the same overlap.
/// Blank input yields no passages.
pub fn split_passages(text: &str, params: &ChunkingParams) -> Vec<String> {
    let max_chars = params.max_chars();
    let overlap_chars = params.overlap_chars();

    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    // false while `buf` holds only carried overlap
    let mut buf_has_new = false;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.len() > max_chars {
            if buf_has_new {
                out.push(std::mem::take(&mut buf));
            }
            out.extend(hard_split(trimmed, max_chars, overlap_chars));
            buf = out
                .last()
                .map(|last| overlap_tail(last, overlap_chars).to_string())
                .unwrap_or_default();
            buf_has_new = false;
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars {
            if buf_has_new {
                let tail = overlap_tail(&buf, overlap_chars).to_string();
                out.push(std::mem::replace(&mut buf, tail));
                buf_has_new = false;
            }
            if !buf.is_empty() && buf.len() + 2 + trimmed.len() > max_chars {
                buf.clear();
            }
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(trimmed);
        buf_has_new = true;
    }

    if buf_has_new {
        out.push(buf);
    }
    out
}

/// Window an oversized paragraph into pieces of at most `max_chars`,
/// breaking at whitespace where possible.
fn hard_split(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;

    loop {
        if rest.len() <= max_chars {
            let piece = rest.trim();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
            break;
        }

        let mut end = snap_to_char_boundary(rest, max_chars);
        if let Some(ws) = rest[..end].rfind(char::is_whitespace) {
            if ws > 0 {
                end = ws;
            }
        }
        if end == 0 {
            end = next_char_boundary(rest);
        }

        let piece = rest[..end].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }

        let mut next = end;
        if overlap_chars > 0 {
            let back = snap_to_char_boundary(rest, end.saturating_sub(overlap_chars));
            let back = rest[back..end]
                .find(char::is_whitespace)
                .map(|p| back + p)
                .unwrap_or(back);
            if back > 0 && back < end {
                next = back;
            }
        }
        rest = &rest[next..];
    }

    pieces
}

/// The last `n` bytes of `s`, advanced to the start of a word. Passages no
/// longer than `n` carry nothing.
fn overlap_tail(s: &str, n: usize) -> &str {
    if n == 0 || s.len() <= n {
        return "";
    }
    let start = snap_to_char_boundary(s, s.len() - n);
    let tail = &s[start..];
    match tail.find(char::is_whitespace) {
        Some(p) => tail[p..].trim_start(),
        None => tail,
    }
}

fn structured_texts(
    ticker: &str,
    component: Component,
    body: &str,
    params: &ChunkingParams,
) -> Vec<String> {
    let records: Vec<String> = match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => items
            .iter()
            .map(|item| render_record(ticker, component, item))
            .collect(),
        Ok(value) => vec![render_record(ticker, component, &value)],
        Err(_) => return split_passages(body, params),
    };

    let max_chars = params.max_chars();
    let mut out = Vec::new();
    for record in records {
        if record.len() > max_chars {
            out.extend(split_passages(&record, params));
        } else {
            out.push(record);
        }
    }
    out
}

/// Render one structured record as text under a `"{ticker} {label}"` header.
/// A string `text` field is used verbatim; otherwise fields are listed as
/// `key: value` lines in key order.
fn render_record(ticker: &str, component: Component, value: &Value) -> String {
    let header = format!("{} {}\n", ticker, component.label());
    match value {
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                return format!("{}{}", header, text.trim());
            }
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let lines: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}: {}", k, render_scalar(&map[k])))
                .collect();
            format!("{}{}", header, lines.join("\n"))
        }
        other => format!("{}{}", header, render_scalar(other)),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => "n/a".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str) -> usize {
    s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
}

//! Best-effort recovery of node lists from free-text provider responses.
//!
//! Analysis providers are asked for a bare JSON array of node descriptors,
//! but real responses arrive wrapped in prose or markdown fences, with
//! trailing commas, single-quoted strings, missing commas between adjacent
//! objects, or truncated mid-structure when an output limit is hit.
//!
//! The repair algorithm is a pipeline of independent passes, each aware of
//! double-quoted string spans so repairs never touch quoted content:
//!
//! 1. Extract the bracketed span between the first `[`/`{` and the last
//!    `]`/`}` (drops surrounding prose and code fences).
//! 2. Normalize: strip trailing commas, insert missing commas between
//!    adjacent `}{`, convert single-quoted strings to double-quoted.
//! 3. Close truncated structures (append missing closers, innermost first).
//! 4. Parse with `serde_json` into [`Node`]s.
//!
//! Parsing is attempted after each stage; the first success wins. Elements
//! that parse are never dropped — an unrecoverable response fails whole.

use thiserror::Error;

use crate::models::Node;

/// Repair failure.
#[derive(Debug, Error)]
pub enum RepairError {
    /// No stage of the pipeline produced parsable JSON.
    #[error("unrepairable response: {0}")]
    Unrepairable(String),
}

/// Recover a node list from a free-text response.
pub fn repair_nodes(raw: &str) -> Result<Vec<Node>, RepairError> {
    let span = extract_json_span(raw).ok_or_else(|| {
        RepairError::Unrepairable("no JSON array or object found in response".to_string())
    })?;

    if let Ok(nodes) = parse_node_list(span) {
        return Ok(nodes);
    }

    let normalized = normalize_single_quotes(span);
    let normalized = insert_missing_commas(&normalized);
    let normalized = strip_trailing_commas(&normalized);
    if let Ok(nodes) = parse_node_list(&normalized) {
        return Ok(nodes);
    }

    let closed = close_truncated(&normalized);
    parse_node_list(&closed).map_err(|e| RepairError::Unrepairable(e.to_string()))
}

/// Parse a JSON string into a node list. A bare object is wrapped into a
/// single-element list.
fn parse_node_list(s: &str) -> Result<Vec<Node>, serde_json::Error> {
    match serde_json::from_str::<Vec<Node>>(s) {
        Ok(nodes) => Ok(nodes),
        Err(err) => match serde_json::from_str::<Node>(s) {
            Ok(node) => Ok(vec![node]),
            Err(_) => Err(err),
        },
    }
}

/// Greedy span extraction: from the first opening bracket/brace to the last
/// closing one. When no closer follows the opener (truncated response), the
/// span runs to the end of the text.
fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let end = text.rfind([']', '}']);
    match end {
        Some(end) if end > start => Some(&text[start..=end]),
        _ => Some(&text[start..]),
    }
}

/// Walk `s` char by char, calling `emit` with each char and whether it sits
/// inside a double-quoted string span. Handles backslash escapes.
fn scan_strings(s: &str, mut emit: impl FnMut(char, bool)) {
    let mut in_string = false;
    let mut escaped = false;
    for ch in s.chars() {
        let was_in_string = in_string;
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            in_string = true;
        }
        emit(ch, was_in_string || in_string);
    }
}

/// Strip commas that directly precede a closing bracket or brace.
fn strip_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending: Option<String> = None; // comma + trailing whitespace
    scan_strings(s, |ch, in_string| {
        if let Some(buf) = pending.as_mut() {
            if !in_string && (ch == ']' || ch == '}') {
                // Drop the comma, keep the whitespace after it.
                out.push_str(&buf[1..]);
                out.push(ch);
                pending = None;
                return;
            }
            if !in_string && ch.is_whitespace() {
                buf.push(ch);
                return;
            }
            out.push_str(buf);
            pending = None;
        }
        if !in_string && ch == ',' {
            pending = Some(",".to_string());
        } else {
            out.push(ch);
        }
    });
    if let Some(buf) = pending {
        out.push_str(&buf);
    }
    out
}

/// Insert the comma LLMs drop between adjacent objects: `} {` becomes `}, {`.
fn insert_missing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut after_close = false; // saw '}' outside a string, only whitespace since
    scan_strings(s, |ch, in_string| {
        if after_close && !in_string && ch == '{' {
            out.push(',');
        }
        if !in_string && ch == '}' {
            after_close = true;
        } else if !ch.is_whitespace() {
            after_close = false;
        }
        out.push(ch);
    });
    out
}

/// Convert single-quoted keys and values to double-quoted, outside existing
/// double-quoted spans. Inner double quotes are escaped; escaped single
/// quotes are unescaped.
fn normalize_single_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    let mut in_double = false;
    let mut escaped = false;
    while i < chars.len() {
        let ch = chars[i];
        if in_double {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_double = false;
            }
            out.push(ch);
            i += 1;
            continue;
        }
        match ch {
            '"' => {
                in_double = true;
                out.push(ch);
                i += 1;
            }
            '\'' => {
                // Re-emit the whole single-quoted span as double-quoted.
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let c = chars[i];
                    if c == '\\' && i + 1 < chars.len() {
                        let next = chars[i + 1];
                        if next == '\'' {
                            out.push('\'');
                        } else {
                            out.push('\\');
                            out.push(next);
                        }
                        i += 2;
                        continue;
                    }
                    if c == '\'' {
                        i += 1;
                        break;
                    }
                    if c == '"' {
                        out.push('\\');
                    }
                    out.push(c);
                    i += 1;
                }
                out.push('"');
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }
    out
}

/// Close a truncated structure: terminate an unfinished string, drop a
/// dangling comma, then append the missing closers innermost-first.
fn close_truncated(s: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in s.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ']' | '}' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return s.to_string();
    }

    let mut out = s.to_string();
    if in_string {
        out.push('"');
    }
    let trimmed_len = out.trim_end().trim_end_matches(',').trim_end().len();
    out.truncate(trimmed_len);
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

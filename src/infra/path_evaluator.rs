//! Embedded evaluator for the path subset of jq expressions.
//!
//! Supported: `.`, `.key`, `."quoted key"`, `.["key"]`, `.[0]`, `.[-1]`,
//! chains of these, an optional trailing `?` per segment, and `a // b`
//! alternatives. Anything else is reported as unsupported and yields no value.

use serde_json::Value;
use tracing::warn;

use crate::app::ports::{normalize_output, ExpressionEvaluator};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(i64),
}

#[derive(Debug, Default)]
pub struct PathEvaluator;

impl PathEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for PathEvaluator {
    fn evaluate(&self, expression: &str, document: &Value) -> Result<Option<String>> {
        for alternative in split_alternatives(expression) {
            let segments = match parse_path(alternative.trim()) {
                Ok(segments) => segments,
                Err(reason) => {
                    warn!("unsupported path expression {}: {}", expression, reason);
                    return Ok(None);
                }
            };
            if let Some(value) = select(document, &segments).and_then(render) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

/// Splits on `//` outside string literals, so quoted keys may contain it.
fn split_alternatives(expression: &str) -> Vec<&str> {
    let bytes = expression.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'/') => {
                parts.push(&expression[start..i]);
                start = i + 2;
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expression[start..]);
    parts
}

fn select<'a>(document: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(document, |current, segment| match segment {
        Segment::Key(key) => current.as_object()?.get(key),
        Segment::Index(idx) => {
            let items = current.as_array()?;
            let resolved = if *idx < 0 {
                items.len().checked_sub(idx.unsigned_abs() as usize)?
            } else {
                *idx as usize
            };
            items.get(resolved)
        }
    })
}

/// Mirrors `jq -er`: null and false are "no value", strings are raw.
fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) => normalize_output(s),
        Value::Bool(true) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

fn parse_path(expr: &str) -> std::result::Result<Vec<Segment>, String> {
    let chars: Vec<char> = expr.chars().collect();
    if chars.first() != Some(&'.') {
        return Err("path must start with '.'".to_string());
    }
    let mut segments = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                match chars.get(i) {
                    None => {}
                    Some('[') => {}
                    Some('"') => {
                        let (key, next) = parse_quoted(&chars, i)?;
                        segments.push(Segment::Key(key));
                        i = next;
                    }
                    Some(c) if is_ident_start(*c) => {
                        let start = i;
                        while i < chars.len() && is_ident_char(chars[i]) {
                            i += 1;
                        }
                        segments.push(Segment::Key(chars[start..i].iter().collect()));
                    }
                    Some(c) => return Err(format!("unexpected '{}' after '.'", c)),
                }
            }
            '[' => {
                i += 1;
                if chars.get(i) == Some(&'"') {
                    let (key, next) = parse_quoted(&chars, i)?;
                    segments.push(Segment::Key(key));
                    i = next;
                } else {
                    let start = i;
                    while i < chars.len() && chars[i] != ']' {
                        i += 1;
                    }
                    let raw: String = chars[start..i].iter().collect();
                    let idx = raw
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| format!("invalid index '{}'", raw))?;
                    segments.push(Segment::Index(idx));
                }
                if chars.get(i) != Some(&']') {
                    return Err("missing ']'".to_string());
                }
                i += 1;
            }
            '?' => i += 1,
            c => return Err(format!("unexpected '{}'", c)),
        }
    }
    Ok(segments)
}

fn parse_quoted(chars: &[char], open: usize) -> std::result::Result<(String, usize), String> {
    let mut out = String::new();
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((out, i + 1)),
            '\\' if i + 1 < chars.len() => {
                out.push(chars[i + 1]);
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated string".to_string())
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

use serde_json::Value;
use std::time::Duration;

use crate::error::Result;

/// Outbound HTTP. Returns the response body of a successful (2xx) GET.
pub trait HttpClientPort {
    fn get(&self, url: &str, timeout: Duration) -> std::result::Result<String, String>;
}

/// Runs one query expression against a JSON document.
///
/// `Ok(None)` means "no value" (missing, null or empty). `Err` is reserved for
/// conditions that make any further extraction impossible, such as the
/// evaluator binary being absent.
pub trait ExpressionEvaluator {
    fn evaluate(&self, expression: &str, document: &Value) -> Result<Option<String>>;
}

/// Shared "no value" rule for evaluator output.
pub fn normalize_output(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

use serde_json::Value;
use tracing::{debug, error};

use crate::app::ports::ExpressionEvaluator;
use crate::error::{MergeError, Result};
use crate::types::{ExtractedFields, FieldMapping};

/// Evaluates each mapped expression against `document`.
///
/// Empty, `null` and missing expressions are skipped. A target with no value
/// is dropped, or fails the run when `fail_on_missing` is set.
pub fn extract_fields(
    evaluator: &dyn ExpressionEvaluator,
    document: &Value,
    mapping: &FieldMapping,
    fail_on_missing: bool,
) -> Result<ExtractedFields> {
    let mut extracted = ExtractedFields::new();
    for (target, expression) in mapping.iter() {
        let Some(expression) = expression.filter(|e| !e.is_empty() && *e != "null") else {
            continue;
        };
        match evaluator.evaluate(expression, document)? {
            Some(value) => {
                extracted.insert(target.to_string(), Value::String(value));
            }
            None if fail_on_missing => {
                error!("Missing required field: {}", target);
                return Err(MergeError::Extraction {
                    target: target.to_string(),
                });
            }
            None => debug!(field = target, "No value for {}", expression),
        }
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Answers from a fixed table and records which expressions were asked.
    struct TableEvaluator {
        answers: HashMap<&'static str, &'static str>,
        asked: RefCell<Vec<String>>,
    }

    impl TableEvaluator {
        fn new(answers: &[(&'static str, &'static str)]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                asked: RefCell::new(Vec::new()),
            }
        }
    }

    impl ExpressionEvaluator for TableEvaluator {
        fn evaluate(&self, expression: &str, _document: &Value) -> Result<Option<String>> {
            self.asked.borrow_mut().push(expression.to_string());
            Ok(self.answers.get(expression).map(|v| v.to_string()))
        }
    }

    struct AbsentTool;

    impl ExpressionEvaluator for AbsentTool {
        fn evaluate(&self, _expression: &str, _document: &Value) -> Result<Option<String>> {
            Err(MergeError::ToolMissing("jq".into()))
        }
    }

    #[test]
    fn collects_values_in_mapping_order() {
        let evaluator = TableEvaluator::new(&[(".id", "X"), (".description", "hi")]);
        let mapping: FieldMapping = [("name", ".id"), ("desc", ".description")].into_iter().collect();
        let out = extract_fields(&evaluator, &json!({}), &mapping, false).unwrap();
        assert_eq!(Value::Object(out), json!({"name": "X", "desc": "hi"}));
    }

    #[test]
    fn blank_and_null_expressions_are_never_evaluated() {
        let evaluator = TableEvaluator::new(&[]);
        let fields = json!({"a": "", "b": "null", "c": null});
        let mapping = FieldMapping::from_inline(fields.as_object().unwrap());
        let out = extract_fields(&evaluator, &json!({}), &mapping, true).unwrap();
        assert!(out.is_empty());
        assert!(evaluator.asked.borrow().is_empty());
    }

    #[test]
    fn missing_value_is_dropped_when_lenient() {
        let evaluator = TableEvaluator::new(&[(".id", "X")]);
        let mapping: FieldMapping = [("name", ".id"), ("license", ".license")].into_iter().collect();
        let out = extract_fields(&evaluator, &json!({}), &mapping, false).unwrap();
        assert_eq!(out.len(), 1);
        assert!(!out.contains_key("license"));
    }

    #[test]
    fn missing_value_is_fatal_when_required() {
        let evaluator = TableEvaluator::new(&[(".id", "X")]);
        let mapping: FieldMapping = [("name", ".id"), ("license", ".license")].into_iter().collect();
        let err = extract_fields(&evaluator, &json!({}), &mapping, true).unwrap_err();
        assert!(matches!(err, MergeError::Extraction { ref target } if target == "license"));
    }

    #[test]
    fn absent_tool_is_fatal_even_when_lenient() {
        let mapping: FieldMapping = [("name", ".id")].into_iter().collect();
        let err = extract_fields(&AbsentTool, &json!({}), &mapping, false).unwrap_err();
        assert!(matches!(err, MergeError::ToolMissing(_)));
    }
}

use jsonschema::JSONSchema;
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::error::{MergeError, Result};

/// Compiled JSON Schema for the registry document.
pub struct SchemaValidator {
    compiled: JSONSchema,
}

impl SchemaValidator {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            MergeError::Config(format!("Failed to read schema {}: {}", path.display(), e))
        })?;
        let schema: Value = serde_json::from_str(&data).map_err(|e| {
            MergeError::Config(format!("Failed to parse schema {}: {}", path.display(), e))
        })?;
        Self::from_value(schema)
    }

    pub fn from_value(schema: Value) -> Result<Self> {
        // jsonschema 0.17 ties compile errors to the schema's lifetime; leak it for the process lifetime
        let schema_static: &'static Value = Box::leak(Box::new(schema));
        let compiled = JSONSchema::options()
            .compile(schema_static)
            .map_err(|e| MergeError::Config(format!("Failed to compile JSON Schema: {}", e)))?;
        Ok(Self { compiled })
    }

    /// Returns every violation as `message at /instance/path`; empty when valid.
    pub fn validate(&self, instance: &Value) -> Vec<String> {
        match self.compiled.validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|error| format!("{} at {}", error, error.instance_path))
                .collect(),
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::constants::{NAME_FIELD, PROJECTS_KEY};
use crate::error::{MergeError, Result};

/// Extracted field values keyed by target field name, in mapping order.
pub type ExtractedFields = Map<String, Value>;

/// One registry record. `name` identifies it; every other field is free-form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Project(Map<String, Value>);

impl Project {
    /// Builds a new record with `name` first, followed by `fields` minus any `name` key.
    pub fn new(name: &str, fields: ExtractedFields) -> Self {
        let mut record = Map::new();
        record.insert(NAME_FIELD.to_string(), Value::String(name.to_string()));
        for (field, value) in fields {
            if field != NAME_FIELD {
                record.insert(field, value);
            }
        }
        Self(record)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get(NAME_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Sets `field`, returning the previous value. Renaming is not supported.
    pub(crate) fn set(&mut self, field: String, value: Value) -> Option<Value> {
        debug_assert_ne!(field, NAME_FIELD);
        self.0.insert(field, value)
    }
}

impl From<Map<String, Value>> for Project {
    fn from(record: Map<String, Value>) -> Self {
        Self(record)
    }
}

/// The projects registry document.
///
/// Top-level keys other than `projects` are kept verbatim and in place.
#[derive(Debug, Clone)]
pub struct Registry {
    document: Map<String, Value>,
    projects: Vec<Project>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MergeError::Config(format!("Failed to read projects file {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(content)
            .map_err(|e| MergeError::Config(format!("Invalid projects JSON: {}", e)))?;
        let Value::Object(mut document) = document else {
            return Err(MergeError::Config(
                "Invalid projects JSON: top level must be an object".to_string(),
            ));
        };

        let projects = match document.get_mut(PROJECTS_KEY).map(Value::take) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => Ok(Project::from(record)),
                    other => Err(MergeError::Config(format!(
                        "Invalid projects JSON: project entries must be objects, got {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(MergeError::Config(format!(
                    "Invalid projects JSON: '{}' must be an array, got {}",
                    PROJECTS_KEY, other
                )))
            }
        };

        Ok(Self { document, projects })
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Exact, case-sensitive lookup by name.
    pub fn find(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name() == Some(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Project> {
        self.projects.iter_mut().find(|p| p.name() == Some(name))
    }

    /// Appends a record. Callers check for an existing name first.
    pub fn push(&mut self, project: Project) {
        debug_assert!(project.name().map_or(true, |n| self.find(n).is_none()));
        self.projects.push(project);
    }

    pub fn to_document(&self) -> Value {
        let mut document = self.document.clone();
        let projects = self
            .projects
            .iter()
            .map(|p| Value::Object(p.fields().clone()))
            .collect();
        document.insert(PROJECTS_KEY.to_string(), Value::Array(projects));
        Value::Object(document)
    }

    /// Pretty-printed (2-space) JSON with a trailing newline.
    pub fn to_pretty_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(&self.to_document())?;
        out.push('\n');
        Ok(out)
    }
}

/// Which reconciliation outcomes a mapping entry permits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowPolicy {
    Create,
    #[default]
    Update,
    Both,
}

impl fmt::Display for AllowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllowPolicy::Create => "create",
            AllowPolicy::Update => "update",
            AllowPolicy::Both => "both",
        };
        f.write_str(s)
    }
}

/// One rule: where to fetch from, how to map fields, and what it may do.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingEntry {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub fields: Option<Map<String, Value>>,
    #[serde(default, rename = "mappingRef")]
    pub mapping_ref: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub allow: AllowPolicy,
}

impl MappingEntry {
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref().filter(|s| !s.is_empty())
    }

    pub fn name_override(&self) -> Option<&str> {
        self.name.as_deref().filter(|s| !s.is_empty())
    }

    /// Inline fields count only when non-empty.
    pub fn inline_fields(&self) -> Option<&Map<String, Value>> {
        self.fields.as_ref().filter(|f| !f.is_empty())
    }

    pub fn mapping_ref(&self) -> Option<&str> {
        self.mapping_ref.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub projects: Vec<MappingEntry>,
}

impl MappingConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MergeError::Config(format!("Failed to read mapping file {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| MergeError::Config(format!("Invalid mapping JSON: {}", e)))
    }
}

/// Target field -> query expression, in declaration order.
///
/// A `None` expression is kept so the extractor can skip it explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping(Vec<(String, Option<String>)>);

impl FieldMapping {
    /// From an inline `fields` object: strings are expressions, nulls are
    /// placeholders, anything else is dropped.
    pub fn from_inline(fields: &Map<String, Value>) -> Self {
        let entries = fields
            .iter()
            .filter_map(|(target, expr)| match expr {
                Value::String(s) => Some((target.clone(), Some(s.clone()))),
                Value::Null => Some((target.clone(), None)),
                other => {
                    warn!(field = %target, "Ignoring non-string expression {}", other);
                    None
                }
            })
            .collect();
        Self(entries)
    }

    /// From a fetched mapping document: only string values are kept.
    pub fn from_reference(document: &Map<String, Value>) -> Self {
        let entries = document
            .iter()
            .filter_map(|(target, expr)| {
                expr.as_str().map(|s| (target.clone(), Some(s.to_string())))
            })
            .collect();
        Self(entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(t, e)| (t.as_str(), e.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Into<String>, E: Into<String>> FromIterator<(T, E)> for FieldMapping {
    fn from_iter<I: IntoIterator<Item = (T, E)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(t, e)| (t.into(), Some(e.into()))).collect())
    }
}

/// Failure-handling switches shared by every stage of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Abort on fetch, naming, policy and validation failures instead of skipping.
    pub strict: bool,
    /// Abort when a mapped expression yields no value.
    pub fail_on_missing: bool,
}

/// A project-ready extraction produced by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedItem {
    pub name: String,
    /// Extracted fields without `name`.
    pub fields: ExtractedFields,
    pub allow: AllowPolicy,
}

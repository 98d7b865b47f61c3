use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app::ports::ExpressionEvaluator;
use crate::constants::{is_http_url, NAME_FIELD};
use crate::error::{tolerate, FetchError, MergeError, Result};
use crate::pipeline::extractor::extract_fields;
use crate::pipeline::fetcher::Fetcher;
use crate::types::{FieldMapping, MappingEntry, ResolvedItem, RunOptions};

/// Expands one mapping entry into project-ready items.
///
/// An empty result means the entry was skipped; `Err` means the run must stop.
pub fn resolve_entry(
    entry: &MappingEntry,
    fetcher: &mut Fetcher,
    evaluator: &dyn ExpressionEvaluator,
    options: RunOptions,
) -> Result<Vec<ResolvedItem>> {
    let Some(source) = entry.source() else {
        warn!("Skipping mapping entry without source: {:?}", entry);
        return Ok(Vec::new());
    };

    let Some(mapping) = effective_mapping(entry, source, fetcher, options.strict)? else {
        return Ok(Vec::new());
    };

    let Some(text) = tolerate(fetcher.fetch(source, true).map_err(MergeError::from), options.strict)?
    else {
        return Ok(Vec::new());
    };

    let parsed = serde_json::from_str::<Value>(&text).map_err(|e| {
        MergeError::from(FetchError::InvalidJson {
            location: source.to_string(),
            source: e,
        })
    });
    let Some(parsed) = tolerate(parsed, options.strict)? else {
        return Ok(Vec::new());
    };

    let items = match parsed {
        Value::Array(items) => items,
        single => vec![single],
    };
    debug!(source, count = items.len(), "Resolving items");

    let mut resolved = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let mut fields = extract_fields(evaluator, item, &mapping, options.fail_on_missing)?;
        if fields.is_empty() {
            warn!(source, "Nothing extracted for item #{}; skipping", index);
            continue;
        }

        let extracted_name = fields.remove(NAME_FIELD);
        let name = entry
            .name_override()
            .map(str::to_string)
            .or_else(|| extracted_name.as_ref().and_then(Value::as_str).map(str::to_string));
        let Some(name) = name else {
            let unnamed = Err(MergeError::Unnamed {
                index,
                origin: source.to_string(),
            });
            tolerate::<()>(unnamed, options.strict)?;
            continue;
        };

        resolved.push(ResolvedItem {
            name,
            fields,
            allow: entry.allow,
        });
    }
    Ok(resolved)
}

/// Picks inline `fields` over `mappingRef`, loading the latter when it is the only option.
fn effective_mapping(
    entry: &MappingEntry,
    source: &str,
    fetcher: &mut Fetcher,
    strict: bool,
) -> Result<Option<FieldMapping>> {
    match (entry.inline_fields(), entry.mapping_ref()) {
        (Some(fields), Some(mapping_ref)) => {
            warn!(
                source,
                "Mapping defines both 'mappingRef' and 'fields'; using 'fields' and ignoring {}",
                mapping_ref
            );
            Ok(Some(FieldMapping::from_inline(fields)))
        }
        (Some(fields), None) => Ok(Some(FieldMapping::from_inline(fields))),
        (None, Some(mapping_ref)) => {
            let loaded = load_mapping_ref(mapping_ref, fetcher, strict)?;
            match loaded {
                Some(mapping) if !mapping.is_empty() => Ok(Some(mapping)),
                _ => {
                    warn!("Could not load mappingRef for {}; skipping.", source);
                    Ok(None)
                }
            }
        }
        (None, None) => {
            warn!(
                "Mapping for source {} has neither 'fields' nor 'mappingRef'; skipping.",
                source
            );
            Ok(None)
        }
    }
}

/// Fetches a remote field-mapping document. Only string values are kept.
fn load_mapping_ref(
    mapping_ref: &str,
    fetcher: &mut Fetcher,
    strict: bool,
) -> Result<Option<FieldMapping>> {
    info!("Loading mappingRef from {}", mapping_ref);
    let text = if is_http_url(mapping_ref) {
        fetcher.fetch(mapping_ref, false)
    } else {
        Err(FetchError::NotRemote(mapping_ref.to_string()))
    };
    let Some(text) = tolerate(text.map_err(MergeError::from), strict)? else {
        return Ok(None);
    };

    let document = serde_json::from_str::<Value>(&text).map_err(|e| {
        MergeError::from(FetchError::InvalidJson {
            location: mapping_ref.to_string(),
            source: e,
        })
    });
    let Some(document) = tolerate(document, strict)? else {
        return Ok(None);
    };

    match document {
        Value::Object(map) => Ok(Some(FieldMapping::from_reference(&map))),
        other => {
            warn!(
                "mappingRef {} is not a JSON object (got {}); ignoring",
                mapping_ref,
                type_name(&other)
            );
            Ok(None)
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::HttpClientPort;
    use crate::config::FetchSettings;
    use crate::infra::path_evaluator::PathEvaluator;
    use crate::types::AllowPolicy;
    use serde_json::json;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    struct StaticHttp(HashMap<&'static str, &'static str>);

    impl HttpClientPort for StaticHttp {
        fn get(&self, url: &str, _timeout: Duration) -> std::result::Result<String, String> {
            self.0
                .get(url)
                .map(|body| body.to_string())
                .ok_or_else(|| "HTTP 404".to_string())
        }
    }

    fn fetcher(root: &Path, remote: &[(&'static str, &'static str)]) -> Fetcher {
        let settings = FetchSettings {
            retries: 1,
            backoff_unit: Duration::ZERO,
            ..FetchSettings::default()
        };
        Fetcher::new(
            Box::new(StaticHttp(remote.iter().copied().collect())),
            settings,
            root.to_path_buf(),
        )
    }

    fn entry(value: serde_json::Value) -> MappingEntry {
        serde_json::from_value(value).unwrap()
    }

    const LENIENT: RunOptions = RunOptions {
        strict: false,
        fail_on_missing: false,
    };
    const STRICT: RunOptions = RunOptions {
        strict: true,
        fail_on_missing: false,
    };

    #[test]
    fn single_object_source_yields_one_item_without_name_field() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"{"id":"X","description":"hi"}"#).unwrap();
        let mut fetcher = fetcher(dir.path(), &[]);
        let e = entry(json!({
            "source": "local:a.json",
            "fields": {"name": ".id", "desc": ".description"},
            "allow": "both"
        }));
        let items = resolve_entry(&e, &mut fetcher, &PathEvaluator::new(), LENIENT).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "X");
        assert_eq!(Value::Object(items[0].fields.clone()), json!({"desc": "hi"}));
        assert_eq!(items[0].allow, AllowPolicy::Both);
    }

    #[test]
    fn array_source_yields_item_per_element_and_skips_unnamed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("many.json"),
            r#"[{"id":"A","v":"1"},{"v":"2"},{"id":"C","v":"3"}]"#,
        )
        .unwrap();
        let mut fetcher = fetcher(dir.path(), &[]);
        let e = entry(json!({"source": "local:many.json", "fields": {"name": ".id", "v": ".v"}}));
        let items = resolve_entry(&e, &mut fetcher, &PathEvaluator::new(), LENIENT).unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
    }

    #[test]
    fn unnamed_item_is_fatal_when_strict() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"{"v":"2"}"#).unwrap();
        let mut fetcher = fetcher(dir.path(), &[]);
        let e = entry(json!({"source": "local:a.json", "fields": {"v": ".v"}}));
        let err = resolve_entry(&e, &mut fetcher, &PathEvaluator::new(), STRICT).unwrap_err();
        assert!(matches!(err, MergeError::Unnamed { index: 0, .. }));
    }

    #[test]
    fn explicit_name_overrides_extracted_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"{"id":"X","v":"1"}"#).unwrap();
        let mut fetcher = fetcher(dir.path(), &[]);
        let e = entry(json!({
            "source": "local:a.json",
            "name": "Override",
            "fields": {"name": ".id", "v": ".v"}
        }));
        let items = resolve_entry(&e, &mut fetcher, &PathEvaluator::new(), LENIENT).unwrap();
        assert_eq!(items[0].name, "Override");
        assert!(!items[0].fields.contains_key("name"));
    }

    #[test]
    fn mapping_ref_is_fetched_remotely() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"{"id":"X","license":"MIT"}"#).unwrap();
        let mut fetcher = fetcher(
            dir.path(),
            &[(
                "https://example.org/map.json",
                r#"{"name":".id","license":".license","ignored":3}"#,
            )],
        );
        let e = entry(json!({"source": "local:a.json", "mappingRef": "https://example.org/map.json"}));
        let items = resolve_entry(&e, &mut fetcher, &PathEvaluator::new(), LENIENT).unwrap();
        assert_eq!(Value::Object(items[0].fields.clone()), json!({"license": "MIT"}));
    }

    #[test]
    fn inline_fields_shadow_mapping_ref() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"{"id":"X","license":"MIT"}"#).unwrap();
        // No remote documents: touching the mappingRef would fail the entry
        let mut fetcher = fetcher(dir.path(), &[]);
        let e = entry(json!({
            "source": "local:a.json",
            "fields": {"name": ".id"},
            "mappingRef": "https://example.org/map.json"
        }));
        let items = resolve_entry(&e, &mut fetcher, &PathEvaluator::new(), STRICT).unwrap();
        assert_eq!(items.len(), 1);
        assert!(fetcher.cache().is_empty());
    }

    #[test]
    fn local_mapping_ref_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"{"id":"X"}"#).unwrap();
        fs::write(dir.path().join("map.json"), r#"{"name":".id"}"#).unwrap();
        let e = entry(json!({"source": "local:a.json", "mappingRef": "local:map.json"}));

        let mut lenient = fetcher(dir.path(), &[]);
        assert!(resolve_entry(&e, &mut lenient, &PathEvaluator::new(), LENIENT)
            .unwrap()
            .is_empty());

        let mut strict = fetcher(dir.path(), &[]);
        let err = resolve_entry(&e, &mut strict, &PathEvaluator::new(), STRICT).unwrap_err();
        assert!(matches!(err, MergeError::Fetch(FetchError::NotRemote(_))));
    }

    #[test]
    fn entry_without_source_or_mapping_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetcher = fetcher(dir.path(), &[]);
        let no_source = entry(json!({"fields": {"name": ".id"}}));
        let no_mapping = entry(json!({"source": "local:a.json", "fields": {}}));
        for e in [no_source, no_mapping] {
            assert!(resolve_entry(&e, &mut fetcher, &PathEvaluator::new(), STRICT)
                .unwrap()
                .is_empty());
        }
    }

    #[test]
    fn traversal_source_is_skipped_when_lenient_and_fatal_when_strict() {
        let dir = tempfile::tempdir().unwrap();
        let e = entry(json!({"source": "local:../../etc/passwd", "fields": {"name": ".id"}}));
        let mut fetcher = fetcher(dir.path(), &[]);
        assert!(resolve_entry(&e, &mut fetcher, &PathEvaluator::new(), LENIENT)
            .unwrap()
            .is_empty());
        let err = resolve_entry(&e, &mut fetcher, &PathEvaluator::new(), STRICT).unwrap_err();
        assert!(matches!(err, MergeError::Fetch(FetchError::Forbidden(_))));
    }
}

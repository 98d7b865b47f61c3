use tracing::{debug, info};

use crate::constants::NAME_FIELD;
use crate::error::{tolerate, MergeError, Result};
use crate::types::{AllowPolicy, ExtractedFields, Project, Registry, ResolvedItem};

/// What reconciling one item did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    /// An existing project had at least one field added or changed.
    Updated,
    Unchanged,
    Skipped,
}

/// Applies one resolved item to the registry under its allow policy.
///
/// Policy violations are fatal when `strict`, otherwise the item is skipped.
pub fn reconcile(registry: &mut Registry, item: ResolvedItem, strict: bool) -> Result<Outcome> {
    let ResolvedItem { name, fields, allow } = item;
    let result = match registry.find_mut(&name) {
        Some(existing) => match allow {
            AllowPolicy::Update | AllowPolicy::Both => {
                let changed = merge_fields(existing, fields);
                if changed > 0 {
                    info!("Updated project {} ({} field(s) changed)", name, changed);
                    Ok(Outcome::Updated)
                } else {
                    debug!("Project {} unchanged", name);
                    Ok(Outcome::Unchanged)
                }
            }
            AllowPolicy::Create => Err(MergeError::PolicyViolation(format!(
                "Project '{}' exists but allow={} forbids update.",
                name, allow
            ))),
        },
        None => match allow {
            AllowPolicy::Create | AllowPolicy::Both => {
                info!("Adding new project {}", name);
                registry.push(Project::new(&name, fields));
                Ok(Outcome::Created)
            }
            AllowPolicy::Update => Err(MergeError::PolicyViolation(format!(
                "Project '{}' does not exist but allow={} forbids creation.",
                name, allow
            ))),
        },
    };
    Ok(tolerate(result, strict)?.unwrap_or(Outcome::Skipped))
}

/// Adds absent fields and overwrites differing ones; `name` is never touched.
///
/// Returns how many fields changed.
pub fn merge_fields(existing: &mut Project, updates: ExtractedFields) -> usize {
    let project = existing.name().unwrap_or_default().to_string();
    let mut changed = 0;
    for (field, value) in updates {
        if field == NAME_FIELD {
            continue;
        }
        match existing.get(&field) {
            Some(current) if *current == value => {
                debug!(project = %project, field = %field, "Unchanged");
            }
            Some(current) => {
                info!("Updating {} for {}: '{}' → '{}'", field, project, display(current), display(&value));
                existing.set(field, value);
                changed += 1;
            }
            None => {
                info!("Adding {} to {}: '{}'", field, project, display(&value));
                existing.set(field, value);
                changed += 1;
            }
        }
    }
    changed
}

fn display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

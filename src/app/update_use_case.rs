use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::app::ports::{ExpressionEvaluator, HttpClientPort};
use crate::config::FetchSettings;
use crate::error::{tolerate, MergeError, Result};
use crate::infra::schema_validator::SchemaValidator;
use crate::pipeline::fetcher::{find_repo_root, Fetcher};
use crate::pipeline::reconciler::{reconcile, Outcome};
use crate::pipeline::resolver::resolve_entry;
use crate::types::{MappingConfig, Registry, RunOptions};

/// Driver states. `Fatal` is reached by returning `Err` from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Loading,
    Processing,
    Validating,
    Writing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Loading => "loading",
            Stage::Processing => "processing",
            Stage::Validating => "validating",
            Stage::Writing => "writing",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Inputs of one run.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub mapping_path: PathBuf,
    pub projects_path: PathBuf,
    pub schema_path: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub inplace: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub output_path: PathBuf,
    pub total_projects: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Items dropped by the allow policy in lenient mode.
    pub skipped: usize,
}

/// `--output` wins; `--inplace` rewrites the registry; otherwise nothing is written.
pub fn resolve_output_path(output: Option<&Path>, inplace: bool, projects_path: &Path) -> Result<PathBuf> {
    match (output, inplace) {
        (Some(path), _) => Ok(path.to_path_buf()),
        (None, true) => Ok(projects_path.to_path_buf()),
        (None, false) => Err(MergeError::NoOutput),
    }
}

/// Fetches, extracts and merges every mapping entry into the registry, then writes it.
pub struct UpdateProjectsUseCase {
    http: Box<dyn HttpClientPort>,
    evaluator: Box<dyn ExpressionEvaluator>,
    fetch_settings: FetchSettings,
    options: RunOptions,
}

impl UpdateProjectsUseCase {
    pub fn new(
        http: Box<dyn HttpClientPort>,
        evaluator: Box<dyn ExpressionEvaluator>,
        fetch_settings: FetchSettings,
        options: RunOptions,
    ) -> Self {
        Self {
            http,
            evaluator,
            fetch_settings,
            options,
        }
    }

    /// Runs all stages. The fetch cache lives only as long as this call.
    pub fn run(self, request: &UpdateRequest) -> Result<RunSummary> {
        let Self {
            http,
            evaluator,
            fetch_settings,
            options,
        } = self;

        debug!(stage = %Stage::Loading);
        let mapping = MappingConfig::load(&request.mapping_path)?;
        let mapping_dir = fs::canonicalize(&request.mapping_path)?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let repo_root = find_repo_root(&mapping_dir);
        info!("Repo root: {}", repo_root.display());
        let mut registry = Registry::load(&request.projects_path)?;

        debug!(stage = %Stage::Processing);
        let mut fetcher = Fetcher::new(http, fetch_settings, repo_root);
        let mut summary = process(&mapping, &mut registry, &mut fetcher, evaluator.as_ref(), options)?;

        if let Some(schema_path) = &request.schema_path {
            debug!(stage = %Stage::Validating);
            validate(&registry, schema_path, options.strict)?;
        }

        debug!(stage = %Stage::Writing);
        let output_path =
            resolve_output_path(request.output.as_deref(), request.inplace, &request.projects_path)?;
        fs::write(&output_path, registry.to_pretty_json()?)?;

        debug!(stage = %Stage::Done);
        summary.output_path = output_path;
        summary.total_projects = registry.len();
        info!(
            "Updated {} with {} projects.",
            summary.output_path.display(),
            summary.total_projects
        );
        Ok(summary)
    }
}

/// Runs every mapping entry in file order. Skips never stop later entries.
pub fn process(
    mapping: &MappingConfig,
    registry: &mut Registry,
    fetcher: &mut Fetcher,
    evaluator: &dyn ExpressionEvaluator,
    options: RunOptions,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    for entry in &mapping.projects {
        for item in resolve_entry(entry, fetcher, evaluator, options)? {
            match reconcile(registry, item, options.strict)? {
                Outcome::Created => summary.created += 1,
                Outcome::Updated => summary.updated += 1,
                Outcome::Unchanged => summary.unchanged += 1,
                Outcome::Skipped => summary.skipped += 1,
            }
        }
    }
    Ok(summary)
}

/// Checks the registry against the schema at `schema_path`.
///
/// An unreadable or uncompilable schema is a `Config` error; violations fail the run when strict.
pub fn validate(registry: &Registry, schema_path: &Path, strict: bool) -> Result<()> {
    let validator = SchemaValidator::load(schema_path)?;
    let violations = validator.validate(&registry.to_document());
    if violations.is_empty() {
        info!("Schema validation OK.");
        return Ok(());
    }
    for violation in &violations {
        error!("Schema violation: {}", violation);
    }
    let failure = Err(MergeError::Validation(format!(
        "{} violation(s) against {}",
        violations.len(),
        schema_path.display()
    )));
    tolerate::<()>(failure, strict)?;
    Ok(())
}

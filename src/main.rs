use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

use projectmeta::app::ports::ExpressionEvaluator;
use projectmeta::app::update_use_case::{UpdateProjectsUseCase, UpdateRequest};
use projectmeta::config::{EvaluatorKind, Settings};
use projectmeta::infra::http_client::ReqwestHttp;
use projectmeta::infra::jq_evaluator::JqEvaluator;
use projectmeta::infra::path_evaluator::PathEvaluator;
use projectmeta::logging;
use projectmeta::types::RunOptions;

/// Update an existing projects.json from external sources using a mapping file.
#[derive(Parser, Debug)]
#[command(name = "update-projects", version)]
struct Cli {
    /// Path to mapping JSON file
    mapping: PathBuf,

    /// Path to existing projects.json file
    projects: PathBuf,

    /// Optional validation schema
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Exit on fetch/JSON/policy errors instead of skipping
    #[arg(long)]
    strict: bool,

    /// Fail if a mapped field has no value
    #[arg(long)]
    fail_on_missing: bool,

    /// Overwrite the projects.json file
    #[arg(long)]
    inplace: bool,

    /// Output file instead of overwriting
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Optional TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Expression evaluator (overrides the settings file)
    #[arg(long, value_enum)]
    evaluator: Option<EvaluatorKind>,
}

fn build_evaluator(kind: EvaluatorKind, settings: &Settings) -> Box<dyn ExpressionEvaluator> {
    match kind {
        EvaluatorKind::Jq => Box::new(JqEvaluator::new(
            settings.evaluator.program.clone(),
            Duration::from_secs(settings.evaluator.timeout_secs),
        )),
        EvaluatorKind::Path => Box::new(PathEvaluator::new()),
    }
}

fn run(cli: Cli, settings: Settings) -> Result<()> {
    let kind = cli.evaluator.unwrap_or(settings.evaluator.kind);
    let evaluator = build_evaluator(kind, &settings);
    let http = ReqwestHttp::new(&settings.fetch.user_agent).context("Failed to build HTTP client")?;

    let options = RunOptions {
        strict: cli.strict,
        fail_on_missing: cli.fail_on_missing,
    };
    let request = UpdateRequest {
        mapping_path: cli.mapping,
        projects_path: cli.projects,
        schema_path: cli.schema,
        output: cli.output,
        inplace: cli.inplace,
    };

    let use_case = UpdateProjectsUseCase::new(Box::new(http), evaluator, settings.fetch, options);
    let summary = use_case.run(&request)?;
    info!(
        created = summary.created,
        updated = summary.updated,
        unchanged = summary.unchanged,
        skipped = summary.skipped,
        "Run complete"
    );
    Ok(())
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init_logging(None);
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init_logging(settings.logging.directory.as_deref());

    match run(cli, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

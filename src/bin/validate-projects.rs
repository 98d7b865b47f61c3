use anyhow::{Context, Result};
use clap::Parser;
use std::{fs, path::PathBuf};

use projectmeta::constants::DEFAULT_SCHEMA_PATH;
use projectmeta::infra::schema_validator::SchemaValidator;
use projectmeta::types::Registry;

/// Validate a projects.json file against the registry schema.
#[derive(Parser, Debug)]
#[command(name = "validate-projects", version, about = "Validate projects JSON against schema")]
struct Cli {
    /// Path to the projects JSON file to validate
    path: PathBuf,

    /// Optional path to a schema file (defaults to schemas/projects.v1.json)
    #[arg(long)]
    schema: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let schema_path = args
        .schema
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCHEMA_PATH));

    let validator = SchemaValidator::load(&schema_path)?;
    let data = fs::read_to_string(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;
    let registry = Registry::from_json(&data)?;

    let violations = validator.validate(&registry.to_document());
    if violations.is_empty() {
        println!("valid");
        return Ok(());
    }
    eprintln!("invalid:");
    for violation in violations {
        eprintln!("- {}", violation);
    }
    std::process::exit(1)
}

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{MergeError, Result};

/// Runtime settings, read from an optional TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fetch: FetchSettings,
    pub evaluator: EvaluatorSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub retries: u32,
    pub backoff_base: f64,
    pub user_agent: String,
    /// Unit the backoff exponent is applied to. Not read from TOML.
    #[serde(skip)]
    pub backoff_unit: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            retries: DEFAULT_FETCH_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Wait before retrying after the given zero-based attempt.
    ///
    /// Saturates instead of panicking when the product does not fit a `Duration`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.backoff_unit.as_secs_f64() * self.backoff_base.powi(attempt as i32);
        Duration::try_from_secs_f64(secs).unwrap_or(if secs.is_sign_negative() {
            Duration::ZERO
        } else {
            Duration::MAX
        })
    }

    fn check(&self) -> Result<()> {
        if !self.backoff_base.is_finite() || self.backoff_base <= 0.0 {
            return Err(MergeError::Config(format!(
                "fetch.backoff_base must be a finite number greater than zero, got {}",
                self.backoff_base
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    /// Shell out to the `jq` binary
    #[default]
    Jq,
    /// Embedded path-expression evaluator
    Path,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluatorSettings {
    pub kind: EvaluatorKind,
    pub program: String,
    pub timeout_secs: u64,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            kind: EvaluatorKind::default(),
            program: DEFAULT_JQ_PROGRAM.to_string(),
            timeout_secs: DEFAULT_EVALUATOR_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub directory: Option<PathBuf>,
}

impl Settings {
    /// Loads settings from `path`, or returns defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path).map_err(|e| {
            MergeError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            MergeError::Config(msg) => {
                MergeError::Config(format!("Invalid config file '{}': {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parses and checks settings; values that would break the fetch loop are `Config` errors.
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(content).map_err(|e| MergeError::Config(e.to_string()))?;
        settings.fetch.check()?;
        Ok(settings)
    }
}

//! Defaults shared by the fetcher, evaluators and CLI.

// Remote fetch
pub const DEFAULT_USER_AGENT: &str = "projectmeta-fetcher";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_FETCH_RETRIES: u32 = 4;
pub const DEFAULT_BACKOFF_BASE: f64 = 1.7;

// Expression evaluation
pub const DEFAULT_JQ_PROGRAM: &str = "jq";
pub const DEFAULT_EVALUATOR_TIMEOUT_SECS: u64 = 10;

// Sources
pub const LOCAL_SOURCE_PREFIX: &str = "local:";
pub const REPO_ROOT_MARKER: &str = ".git";

// Registry document
pub const PROJECTS_KEY: &str = "projects";
pub const NAME_FIELD: &str = "name";

pub const DEFAULT_SCHEMA_PATH: &str = "schemas/projects.v1.json";

/// True when `source` is an absolute http:// or https:// URL.
pub fn is_http_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod types;

// Core stages: fetch, extract, resolve, reconcile
pub mod pipeline;

// Ports and the run driver
pub mod app;
// Adapters for HTTP, jq, the embedded evaluator and JSON Schema
pub mod infra;

pub mod http_client;
pub mod jq_evaluator;
pub mod path_evaluator;
pub mod schema_validator;

use std::fs;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes logging to stderr, plus a daily-rotated JSON log file when a
/// directory is given.
pub fn init_logging(log_dir: Option<&Path>) {
    // Respect RUST_LOG if set; otherwise info for our crate, warn for dependencies
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("projectmeta=info,update_projects=info,warn"));

    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let file_layer = log_dir.and_then(|dir| {
        if let Err(e) = fs::create_dir_all(dir) {
            eprintln!("cannot create log directory {}: {}", dir.display(), e);
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(dir, "update-projects.log");
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
        // The guard flushes on drop; the subscriber lives for the whole process
        std::mem::forget(guard);
        Some(fmt::layer().json().with_writer(non_blocking_writer))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();
}

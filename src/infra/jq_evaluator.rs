use serde_json::Value;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::app::ports::{normalize_output, ExpressionEvaluator};
use crate::error::{MergeError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Evaluates expressions with `jq -er`, which exits non-zero on null/false
/// results instead of printing `null`.
///
/// The program is only looked up when the first expression is evaluated.
pub struct JqEvaluator {
    program: String,
    timeout: Duration,
}

impl JqEvaluator {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> MergeError {
        MergeError::ToolMissing(format!(
            "{} could not be started: {}. Install jq or use --evaluator path",
            self.program, e
        ))
    }

    fn wait_with_timeout(&self, child: &mut Child) -> std::io::Result<Option<bool>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status.success()));
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ExpressionEvaluator for JqEvaluator {
    fn evaluate(&self, expression: &str, document: &Value) -> Result<Option<String>> {
        let input = serde_json::to_vec(document)?;
        let mut child = match Command::new(&self.program)
            .arg("-er")
            .arg(expression)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.spawn_error(e)),
            Err(e) => {
                warn!(expression, "jq could not be started: {}", e);
                return Ok(None);
            }
        };

        // Drain pipes on helper threads so a large result cannot block jq
        let stdout = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = out.read_to_string(&mut buf);
                buf
            })
        });
        let stderr = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = err.read_to_string(&mut buf);
                buf
            })
        });

        if let Some(mut stdin) = child.stdin.take() {
            // Dropping stdin closes the pipe so jq sees EOF
            if let Err(e) = stdin.write_all(&input) {
                warn!(expression, "failed to write document to jq: {}", e);
            }
        }

        let outcome = self.wait_with_timeout(&mut child)?;
        let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
        let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

        match outcome {
            Some(true) => Ok(normalize_output(&stdout)),
            Some(false) => {
                let msg = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
                warn!("jq {} failed: {}", expression, msg);
                Ok(None)
            }
            None => {
                warn!(expression, "jq timed out after {:?}", self.timeout);
                Ok(None)
            }
        }
    }
}

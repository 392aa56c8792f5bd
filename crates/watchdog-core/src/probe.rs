//! Liveness probe against the gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::command::{self, CommandError, CommandOutput};
use crate::config::{ProbeConfig, ProbeMode};
use crate::io::truncate_chars;

/// Diagnostics are capped so one bad probe can't flood the log.
pub const DIAGNOSTIC_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub healthy: bool,
    pub diagnostic: String,
}

impl ProbeResult {
    pub fn healthy(diagnostic: impl AsRef<str>) -> Self {
        Self {
            healthy: true,
            diagnostic: truncate_chars(diagnostic.as_ref(), DIAGNOSTIC_LIMIT),
        }
    }

    pub fn unhealthy(diagnostic: impl AsRef<str>) -> Self {
        Self {
            healthy: false,
            diagnostic: truncate_chars(diagnostic.as_ref(), DIAGNOSTIC_LIMIT),
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    /// One liveness check. Transport failures come back as `healthy: false`.
    async fn probe(&self) -> ProbeResult;
}

// ---------------------------------------------------------------------------
// CommandProbe
// ---------------------------------------------------------------------------

/// Probe backed by a gateway CLI call, either `status` inspection or a real
/// send-test message to the configured self target.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    argv: Vec<String>,
    failure_markers: Vec<String>,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(argv: Vec<String>, failure_markers: Vec<String>, timeout: Duration) -> Self {
        Self {
            argv,
            failure_markers,
            timeout,
        }
    }

    pub fn from_config(cfg: &ProbeConfig) -> Self {
        let argv = match cfg.mode {
            ProbeMode::Status => cfg.status_command.clone(),
            ProbeMode::SendTest => {
                let mut argv = cfg.send_command.clone();
                argv.extend([
                    "--target".to_string(),
                    cfg.self_target.clone(),
                    "--message".to_string(),
                    cfg.test_message.clone(),
                ]);
                argv
            }
        };
        Self::new(argv, cfg.failure_markers.clone(), cfg.timeout())
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn probe(&self) -> ProbeResult {
        let outcome = command::run(&self.argv, self.timeout).await;
        interpret(outcome, &self.failure_markers)
    }
}

/// Exit 0 with no failure marker in the output is healthy; anything else is not.
pub fn interpret(
    outcome: Result<CommandOutput, CommandError>,
    failure_markers: &[String],
) -> ProbeResult {
    match outcome {
        Ok(output) => {
            let text = output.combined();
            if let Some(marker) = find_marker(&text, failure_markers) {
                let diagnostic = if text.is_empty() {
                    format!("failure marker '{marker}'")
                } else {
                    format!("failure marker '{marker}': {text}")
                };
                return ProbeResult::unhealthy(diagnostic);
            }
            let first_line = text.lines().next().unwrap_or("").trim();
            if first_line.is_empty() {
                ProbeResult::healthy("ok")
            } else {
                ProbeResult::healthy(first_line)
            }
        }
        Err(e) => ProbeResult::unhealthy(e.to_string()),
    }
}

fn find_marker<'a>(text: &str, markers: &'a [String]) -> Option<&'a str> {
    let haystack = text.to_lowercase();
    markers
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .find(|m| haystack.contains(&m.to_lowercase()))
}

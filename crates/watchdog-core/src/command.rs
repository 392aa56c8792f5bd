//! Subprocess invocation with a hard timeout.
//!
//! Every collaborator the watchdog talks to (gateway CLI, pkill/pgrep,
//! systemctl, the email CLI) is an external program. They all go through
//! [`run`], which never blocks longer than the given timeout and reports
//! failures as a typed [`CommandError`] instead of a bare exit code.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::io::truncate_chars;

/// Cap on how much of a failing command's output is carried in an error.
const ERROR_OUTPUT_LIMIT: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, true) => String::new(),
            (false, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{out}\n{err}"),
        }
    }
}

/// Coarse classification of [`CommandError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    Timeout,
    NotFound,
    NonZeroExit,
    Unreachable,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("'{program}' timed out after {}s", .after.as_secs())]
    Timeout { program: String, after: Duration },

    #[error("'{0}' not found on PATH")]
    NotFound(String),

    #[error("'{program}' exited with {}: {}", exit_label(.code), .output.combined())]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        output: CommandOutput,
    },

    #[error("'{program}' could not be run: {reason}")]
    Unreachable { program: String, reason: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "signal".to_string(),
    }
}

impl CommandError {
    pub fn kind(&self) -> CommandErrorKind {
        match self {
            CommandError::Timeout { .. } => CommandErrorKind::Timeout,
            CommandError::NotFound(_) => CommandErrorKind::NotFound,
            CommandError::NonZeroExit { .. } => CommandErrorKind::NonZeroExit,
            CommandError::Unreachable { .. } => CommandErrorKind::Unreachable,
        }
    }

    /// Exit status for `NonZeroExit`, `None` otherwise.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::NonZeroExit { code, .. } => *code,
            _ => None,
        }
    }

    pub(crate) fn spawn_failed(program: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            CommandError::NotFound(program.to_string())
        } else {
            CommandError::Unreachable {
                program: program.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Run `argv` to completion, capturing output, killing it after `limit`.
pub async fn run(argv: &[String], limit: Duration) -> Result<CommandOutput, CommandError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(CommandError::Unreachable {
            program: String::new(),
            reason: "empty command".to_string(),
        });
    };

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CommandError::spawn_failed(program, e))?;

    // On timeout the wait future is dropped with the child, which kills it.
    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(CommandError::Unreachable {
                program: program.clone(),
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(CommandError::Timeout {
                program: program.clone(),
                after: limit,
            })
        }
    };

    let captured = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if output.status.success() {
        Ok(captured)
    } else {
        Err(CommandError::NonZeroExit {
            program: program.clone(),
            code: output.status.code(),
            output: CommandOutput {
                stdout: truncate_chars(&captured.stdout, ERROR_OUTPUT_LIMIT),
                stderr: truncate_chars(&captured.stderr, ERROR_OUTPUT_LIMIT),
            },
        })
    }
}

/// Resolve `program` on PATH.
pub fn locate(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

//! External action trigger.
//!
//! After rotation the pipeline hands the file to an external analysis CLI.
//! The core only depends on the [`ActionTrigger`] contract; [`CommandTrigger`]
//! is the subprocess-backed implementation.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Output substituted for a real invocation in dry-run mode.
pub const DRY_RUN_PLACEHOLDER: &str = "DRY RUN MODE - No actual execution";

/// Timeout for the startup `--version` probe.
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from invoking the external tool.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} exited with code {code:?}")]
    Failed {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

/// Result of a trigger invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The tool ran and exited successfully.
    Completed { stdout: String, stderr: String },
    /// Invocation was skipped.
    DryRun,
}

impl TriggerOutcome {
    /// The text shown as the tool's result.
    pub fn stdout(&self) -> &str {
        match self {
            TriggerOutcome::Completed { stdout, .. } => stdout,
            TriggerOutcome::DryRun => DRY_RUN_PLACEHOLDER,
        }
    }
}

/// Boundary to whatever consumes rotated files.
#[async_trait]
pub trait ActionTrigger: Send + Sync {
    /// The single positional argument passed for `path`.
    fn argument_for(&self, path: &Path) -> String;

    /// Whether invocations are skipped.
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Run the action for a rotated file.
    async fn trigger(&self, path: &Path) -> Result<TriggerOutcome, TriggerError>;
}

/// Runs an external command with `<template> <path>` as its final argument.
#[derive(Debug, Clone)]
pub struct CommandTrigger {
    program: String,
    args: Vec<String>,
    template: String,
    timeout: Duration,
    dry_run: bool,
}

impl CommandTrigger {
    /// Create a trigger that runs `program args... "<template> <path>"`.
    pub fn new(program: impl Into<String>, args: Vec<String>, template: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            template: template.into(),
            timeout: Duration::from_secs(300),
            dry_run: false,
        }
    }

    /// Kill the subprocess if it runs longer than this.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Skip invocation entirely.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The program being run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check that the program exists by running `program --version`.
    pub async fn check_available(&self) -> bool {
        let mut command = Command::new(&self.program);
        command
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(AVAILABILITY_TIMEOUT, command.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!("{} not available: {}", self.program, e);
                false
            }
            Err(_) => {
                tracing::debug!("{} --version timed out", self.program);
                false
            }
        }
    }
}

#[async_trait]
impl ActionTrigger for CommandTrigger {
    fn argument_for(&self, path: &Path) -> String {
        format!("{} {}", self.template, path.display())
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn trigger(&self, path: &Path) -> Result<TriggerOutcome, TriggerError> {
        if self.dry_run {
            tracing::info!("Dry run mode: skipping {} execution", self.program);
            return Ok(TriggerOutcome::DryRun);
        }

        let argument = self.argument_for(path);
        tracing::info!("Running {} with file: {}", self.program, path.display());

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&argument)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| TriggerError::TimedOut {
                program: self.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| TriggerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(TriggerError::Failed {
                program: self.program.clone(),
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(TriggerOutcome::Completed { stdout, stderr })
    }
}

/// Records every triggered path instead of running anything. Useful for
/// wiring the pipeline without an external tool.
#[derive(Debug, Default)]
pub struct RecordingTrigger {
    triggered: std::sync::Mutex<Vec<PathBuf>>,
}

impl RecordingTrigger {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths triggered so far, in order.
    pub fn triggered(&self) -> Vec<PathBuf> {
        self.triggered
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ActionTrigger for RecordingTrigger {
    fn argument_for(&self, path: &Path) -> String {
        path.display().to_string()
    }

    async fn trigger(&self, path: &Path) -> Result<TriggerOutcome, TriggerError> {
        self.triggered
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(path.to_path_buf());
        Ok(TriggerOutcome::Completed {
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}
